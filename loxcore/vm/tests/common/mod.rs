use std::cell::RefCell;
use std::io;
use std::rc::Rc;

/// Write sink the test keeps a handle to after handing the VM its clone.
#[derive(Clone, Default)]
pub struct SharedOut(pub Rc<RefCell<Vec<u8>>>);

impl SharedOut {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("utf8 output")
    }
}

impl io::Write for SharedOut {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
