// util.rs — small server-side helpers

use std::collections::BTreeSet;

/// Pool of one-byte ids. Hands out the lowest free id first so a fresh
/// server fills ids 0, 1, 2, ... the way clients expect.
#[derive(Debug)]
pub struct IdPool {
    free: BTreeSet<u8>,
}

impl IdPool {
    pub fn new(count: usize) -> Self {
        Self { free: (0..count as u8).collect() }
    }

    pub fn take(&mut self) -> Option<u8> {
        let id = *self.free.iter().next()?;
        self.free.remove(&id);
        Some(id)
    }

    /// Return an id. A double free is a server bug, not a client one.
    pub fn put(&mut self, id: u8) {
        assert!(self.free.insert(id), "id {id} freed twice");
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }
}

/// Split a message into chat-sized lines on word boundaries.
pub fn wrap_message(message: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in message.split_whitespace() {
        if !line.is_empty() && line.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        // a single over-long word gets hard-chopped
        let mut rest = word;
        while line.len() + rest.len() > width {
            let cut = width - line.len();
            let mut cut = cut.min(rest.len());
            while !rest.is_char_boundary(cut) {
                cut -= 1;
            }
            line.push_str(&rest[..cut]);
            lines.push(std::mem::take(&mut line));
            rest = &rest[cut..];
        }
        line.push_str(rest);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_lowest_first() {
        let mut pool = IdPool::new(4);
        assert_eq!(pool.take(), Some(0));
        assert_eq!(pool.take(), Some(1));
        pool.put(0);
        assert_eq!(pool.take(), Some(0));
        assert_eq!(pool.take(), Some(2));
        assert_eq!(pool.take(), Some(3));
        assert_eq!(pool.take(), None);
    }

    #[test]
    #[should_panic(expected = "freed twice")]
    fn test_pool_double_free_panics() {
        let mut pool = IdPool::new(4);
        let id = pool.take().unwrap();
        pool.put(id);
        pool.put(id);
    }

    #[test]
    fn test_no_id_leak_over_churn() {
        let mut pool = IdPool::new(8);
        for _ in 0..100 {
            let a = pool.take().unwrap();
            let b = pool.take().unwrap();
            pool.put(a);
            pool.put(b);
        }
        assert_eq!(pool.available(), 8);
    }

    #[test]
    fn test_wrap_message() {
        let lines = wrap_message("one two three", 8);
        assert_eq!(lines, vec!["one two", "three"]);
        let long = "x".repeat(25);
        let lines = wrap_message(&long, 10);
        assert_eq!(lines, vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
        assert!(wrap_message("", 10).is_empty());
    }
}
