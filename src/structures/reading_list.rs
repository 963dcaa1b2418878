/// Singly linked, append-ordered sequence used as the per-station staging
/// buffer before a batch write.
///
/// O(1) append at the tail, O(n) forward traversal and search. The list does
/// not sort: ordering is whatever the caller appends.
pub struct ReadingList<T> {
    head: Option<Box<Node<T>>>,
    tail: *mut Node<T>,
    len: usize,
}

struct Node<T> {
    value: T,
    next: Option<Box<Node<T>>>,
}

impl<T> ReadingList<T> {
    pub fn new() -> Self {
        Self {
            head: None,
            tail: std::ptr::null_mut(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a value at the tail in O(1).
    pub fn append(&mut self, value: T) {
        let mut node = Box::new(Node { value, next: None });
        let raw: *mut Node<T> = &mut *node;
        if self.tail.is_null() {
            self.head = Some(node);
        } else {
            // SAFETY: tail points at the last node owned by this list; it is
            // only ever written through &mut self.
            unsafe {
                (*self.tail).next = Some(node);
            }
        }
        self.tail = raw;
        self.len += 1;
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            node: self.head.as_deref(),
        }
    }

    /// Linear scan for the first element matching the predicate.
    pub fn find<P: FnMut(&T) -> bool>(&self, mut predicate: P) -> Option<&T> {
        self.iter().find(|item| predicate(item))
    }

    /// Drains the list front to back, leaving it empty.
    pub fn drain(&mut self) -> Drain<T> {
        self.tail = std::ptr::null_mut();
        self.len = 0;
        Drain {
            node: self.head.take(),
        }
    }
}

impl<T> Default for ReadingList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for ReadingList<T> {
    fn drop(&mut self) {
        // Unlink iteratively so long lists cannot overflow the stack
        let mut node = self.head.take();
        while let Some(mut n) = node {
            node = n.next.take();
        }
    }
}

// The tail pointer aliases a node owned through `head`; moving the list
// between threads is safe whenever T is.
unsafe impl<T: Send> Send for ReadingList<T> {}

pub struct Iter<'a, T> {
    node: Option<&'a Node<T>>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let node = self.node?;
        self.node = node.next.as_deref();
        Some(&node.value)
    }
}

pub struct Drain<T> {
    node: Option<Box<Node<T>>>,
}

impl<T> Iterator for Drain<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let mut node = self.node.take()?;
        self.node = node.next.take();
        Some(node.value)
    }
}

impl<T> Drop for Drain<T> {
    fn drop(&mut self) {
        let mut node = self.node.take();
        while let Some(mut n) = node {
            node = n.next.take();
        }
    }
}
