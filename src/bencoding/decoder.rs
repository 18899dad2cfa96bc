use std::{
    collections::BTreeMap,
    io::{Error, ErrorKind, Result},
};

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;

use crate::bencoding::value::Value;
use crate::codec::AsyncDecoder;

const BUFFER_SIZE: usize = 1024 * 8;

impl AsyncDecoder for Value {
    async fn decode<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self> {
        let mut parser = Parser::new();
        let mut buf = [0; BUFFER_SIZE];
        loop {
            let read = stream.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            parser.feed(&buf[0..read])?;
        }
        parser.result()
    }
}

impl Value {
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self> {
        let mut parser = Parser::new();
        parser.feed(bytes)?;
        parser.result()
    }
}

/// Push parser: bytes can be fed in arbitrary chunks as they arrive.
#[derive(Debug)]
pub struct Parser {
    state: State,
    stack: Vec<StackState>,
    position: usize,
}

#[derive(Debug)]
enum State {
    Ready,
    Integer(Vec<u8>),
    StringLength(usize),
    StringContents(Vec<u8>, usize),
    Done(Value),
}

#[derive(Debug)]
enum StackState {
    List(Vec<Value>),
    Dictionary(Option<String>, BTreeMap<String, Value>),
}

impl StackState {
    fn new_list() -> Self {
        Self::List(Vec::new())
    }

    fn new_dictionary() -> Self {
        Self::Dictionary(None, BTreeMap::new())
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidData, message.into())
}

fn parse_integer(digits: &[u8]) -> Result<i64> {
    let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);
    match unsigned {
        [] => return Err(invalid("empty integer")),
        [b'0'] if unsigned.len() < digits.len() => return Err(invalid("minus zero not allowed")),
        [b'0', _, ..] => return Err(invalid("leading zeros not allowed")),
        _ => (),
    }
    std::str::from_utf8(digits)
        .ok()
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| invalid("integer out of range"))
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: State::Ready,
            stack: Vec::new(),
            position: 0,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        for byte in bytes {
            self.consume(*byte)?;
        }
        Ok(())
    }

    fn consume(&mut self, byte: u8) -> Result<()> {
        match (&mut self.state, byte) {
            // Integer
            (State::Ready, b'i') => {
                self.state = State::Integer(Vec::new());
            }
            (State::Integer(digits), b'-') if digits.is_empty() => {
                digits.push(byte);
            }
            (State::Integer(digits), b'0'..=b'9') => {
                digits.push(byte);
            }
            (State::Integer(digits), b'e') => {
                let integer = parse_integer(digits)?;
                self.emit(Value::Integer(integer))?;
            }

            // List
            (State::Ready, b'l') => {
                self.stack.push(StackState::new_list());
            }

            // Dictionary
            (State::Ready, b'd') => {
                self.stack.push(StackState::new_dictionary());
            }

            // String
            (State::Ready, b'0'..=b'9') => {
                let digit = (byte - b'0') as usize;
                self.state = State::StringLength(digit);
            }
            (State::StringLength(0), b'0'..=b'9') => {
                return Err(invalid("leading zeros not allowed in string length"));
            }
            (State::StringLength(length), b'0'..=b'9') => {
                let digit = (byte - b'0') as usize;
                *length = length
                    .checked_mul(10)
                    .and_then(|length| length.checked_add(digit))
                    .ok_or_else(|| invalid("string length out of range"))?;
            }
            (&mut State::StringLength(0), b':') => {
                self.emit(Value::String(Vec::new()))?;
            }
            (&mut State::StringLength(length), b':') => {
                let string = Vec::with_capacity(length.min(BUFFER_SIZE));
                self.state = State::StringContents(string, length);
            }
            (State::StringContents(bytes, length), _) => {
                bytes.push(byte);
                if bytes.len() == *length {
                    let string = std::mem::take(bytes);
                    self.emit(Value::String(string))?;
                }
            }

            // End collection
            (State::Ready, b'e') => match self.stack.pop() {
                Some(StackState::List(list)) => {
                    self.emit(Value::List(list))?;
                }
                Some(StackState::Dictionary(None, entries)) => {
                    self.emit(Value::Dictionary(entries))?;
                }
                Some(StackState::Dictionary(Some(key), _)) => {
                    return Err(invalid(format!("missing value for key {:?}", key)));
                }
                None => {
                    return Err(invalid("nothing to close"));
                }
            },

            // Ignore trailing whitespace
            (State::Done(_), b'\n' | b'\r' | b' ') => return Ok(()),

            // Unexpected input
            _ => {
                return Err(invalid(format!(
                    "unexpected byte 0x{byte:02x} at position {}",
                    self.position
                )));
            }
        }
        self.position += 1;
        Ok(())
    }

    fn emit(&mut self, value: Value) -> Result<()> {
        match (self.stack.last_mut(), value) {
            (Some(StackState::List(list)), value) => {
                list.push(value);
                self.state = State::Ready;
            }
            (Some(StackState::Dictionary(key @ None, _)), Value::String(string)) => {
                let string = String::from_utf8(string)
                    .map_err(|_| invalid("dictionary key should be valid utf8"))?;
                *key = Some(string);
                self.state = State::Ready;
            }
            (Some(StackState::Dictionary(None, _)), _) => {
                return Err(invalid("only string keys are allowed in dictionaries"));
            }
            (Some(StackState::Dictionary(key @ Some(_), entries)), value) => {
                if let Some(key) = key.take() {
                    entries.insert(key, value);
                }
                self.state = State::Ready;
            }
            (None, value) => {
                self.state = State::Done(value);
            }
        }
        Ok(())
    }

    pub fn result(self) -> Result<Value> {
        match self.state {
            State::Done(value) => Ok(value),
            _ => Err(Error::new(ErrorKind::UnexpectedEof, "incomplete")),
        }
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}
