use crate::operation::OperationFrame;

/// LIFO of in-progress operations. A `List` pushed while a `Connect` is reconnecting, for
/// instance, sits above it until the connect finishes and pops, at which point the list becomes
/// top-of-stack and is sent for the first time.
///
/// Deliberately thin: the business rules for *when* to push, pop, or reset a frame live on
/// `ControlSocket`, which has the context (the live helper, the last-used server) to make those
/// calls. This type only owns the storage and exposes the stack discipline itself.
#[derive(Default)]
pub struct OperationStack {
    frames: Vec<OperationFrame>,
}

impl OperationStack {
    pub fn new() -> OperationStack {
        OperationStack { frames: Vec::new() }
    }

    pub fn push(&mut self, frame: OperationFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<OperationFrame> {
        self.frames.pop()
    }

    pub fn top_mut(&mut self) -> Option<&mut OperationFrame> {
        self.frames.last_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationBody;
    use crate::operations::mkdir::{MkdirFlags, MkdirOp};

    fn frame(name: &str) -> OperationFrame {
        OperationFrame::new(name, true, OperationBody::Mkdir(MkdirOp::new("/tmp".into(), MkdirFlags::default())))
    }

    #[test]
    fn push_then_pop_is_lifo() {
        let mut stack = OperationStack::new();
        stack.push(frame("first"));
        stack.push(frame("second"));
        assert_eq!(stack.pop().unwrap().name, "second");
        assert_eq!(stack.pop().unwrap().name, "first");
        assert!(stack.is_empty());
    }

    #[test]
    fn top_mut_reflects_the_most_recent_push() {
        let mut stack = OperationStack::new();
        stack.push(frame("only"));
        assert_eq!(stack.top_mut().unwrap().name, "only");
    }
}
