use tokio_util::bytes::{BufMut, BytesMut};

use crate::bencoding::value::Value;

/// Writes bencoded items straight into a buffer.
///
/// Containers are opened with [`Encoder::list`] or [`Encoder::dictionary`]
/// and closed with [`Encoder::end`]. Dictionary keys are written as plain
/// strings, in whatever order the caller emits them, so they must already be
/// sorted.
pub struct Encoder<'a> {
    dst: &'a mut BytesMut,
    depth: usize,
}

impl<'a> Encoder<'a> {
    pub fn new(dst: &'a mut BytesMut) -> Self {
        Self { dst, depth: 0 }
    }

    pub fn string(&mut self, bytes: &[u8]) -> &mut Self {
        self.dst.put_slice(bytes.len().to_string().as_bytes());
        self.dst.put_u8(b':');
        self.dst.put_slice(bytes);
        self
    }

    pub fn integer(&mut self, integer: i64) -> &mut Self {
        self.dst.put_u8(b'i');
        self.dst.put_slice(integer.to_string().as_bytes());
        self.dst.put_u8(b'e');
        self
    }

    pub fn list(&mut self) -> &mut Self {
        self.open(b'l')
    }

    pub fn dictionary(&mut self) -> &mut Self {
        self.open(b'd')
    }

    /// Closes the innermost open container. Does nothing at the top level.
    pub fn end(&mut self) -> &mut Self {
        if self.depth > 0 {
            self.depth -= 1;
            self.dst.put_u8(b'e');
        }
        self
    }

    fn open(&mut self, tag: u8) -> &mut Self {
        self.depth += 1;
        self.dst.put_u8(tag);
        self
    }

    /// Writes a whole value tree, walking it with an explicit stack.
    pub fn value(&mut self, value: &Value) -> &mut Self {
        let mut pending = vec![Pending::Value(value)];
        while let Some(next) = pending.pop() {
            match next {
                Pending::End => {
                    self.end();
                }
                Pending::Key(key) => {
                    self.string(key.as_bytes());
                }
                Pending::Value(Value::String(bytes)) => {
                    self.string(bytes);
                }
                Pending::Value(Value::Integer(integer)) => {
                    self.integer(*integer);
                }
                Pending::Value(Value::List(values)) => {
                    self.list();
                    pending.push(Pending::End);
                    pending.extend(values.iter().rev().map(Pending::Value));
                }
                Pending::Value(Value::Dictionary(entries)) => {
                    self.dictionary();
                    pending.push(Pending::End);
                    for (key, value) in entries.iter().rev() {
                        pending.push(Pending::Value(value));
                        pending.push(Pending::Key(key));
                    }
                }
            }
        }
        self
    }
}

enum Pending<'v> {
    Value(&'v Value),
    Key(&'v str),
    End,
}

impl Value {
    pub fn encode_into(&self, dst: &mut BytesMut) {
        Encoder::new(dst).value(self);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut dst = BytesMut::new();
        self.encode_into(&mut dst);
        dst.to_vec()
    }
}
