use crate::runtime::runtime_error::InterpreterError;

/// Bounded LIFO stack used for both the value stack and the invoke stack.
#[derive(Debug)]
pub struct Stack<T> {
    items: Vec<T>,
    limit: usize,
}

impl<T> Stack<T> {
    pub fn new(limit: usize) -> Self {
        Stack {
            items: Vec::new(),
            limit,
        }
    }

    pub fn push(&mut self, item: T) -> Result<(), InterpreterError> {
        if self.items.len() >= self.limit {
            return Err(InterpreterError::StackOverflow);
        }

        self.items.push(item);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<T, InterpreterError> {
        self.items.pop().ok_or(InterpreterError::IllegalStackOperation)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let mut stack = Stack::new(8);
        stack.push(1).unwrap();
        stack.push(2).unwrap();

        assert_eq!(stack.len(), 2);
        assert_eq!(stack.pop(), Ok(2));
        assert_eq!(stack.pop(), Ok(1));
        assert!(stack.is_empty());
    }

    #[test]
    fn test_pop_empty_fails() {
        let mut stack: Stack<i32> = Stack::new(8);
        assert_eq!(stack.pop(), Err(InterpreterError::IllegalStackOperation));
    }

    #[test]
    fn test_push_past_limit_fails() {
        let mut stack = Stack::new(2);
        stack.push(1).unwrap();
        stack.push(2).unwrap();
        assert_eq!(stack.push(3), Err(InterpreterError::StackOverflow));
    }
}
