/// Receive buffer for the resynchronizer.
///
/// Consumed bytes are only dropped from the backing `Vec` when more than half
/// of it is dead, so popping single bytes while hunting for a frame boundary
/// stays cheap.
#[derive(Debug, Default)]
pub struct Buffer {
    data: Vec<u8>,
    read_pos: usize,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer {
            data: Vec::with_capacity(512),
            read_pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.read_pos
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.read_pos..]
    }

    /// Drop `len` bytes from the front, returning them.
    pub fn consume(&mut self, len: usize) -> &[u8] {
        assert!(len <= self.len());
        let start = self.read_pos;
        self.read_pos += len;
        &self.data[start..self.read_pos]
    }

    pub fn write(&mut self, bytes: &[u8]) {
        if self.read_pos == self.data.len() {
            self.clear();
        } else if self.read_pos > self.data.len() / 2 {
            self.data.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.data.extend_from_slice(bytes);
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.read_pos = 0;
    }
}
