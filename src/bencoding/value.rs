use std::collections::BTreeMap;

use anyhow::{Error, Result, anyhow};

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Value {
    String(Vec<u8>),
    Integer(i64),
    List(Vec<Value>),
    Dictionary(BTreeMap<String, Value>),
}

impl Value {
    pub fn string(string: &str) -> Self {
        Self::String(string.as_bytes().to_vec())
    }

    pub fn list() -> Self {
        Self::List(Vec::new())
    }

    pub fn dictionary() -> Self {
        Self::Dictionary(BTreeMap::new())
    }

    /// Builder-style insert. Has no effect on anything but a dictionary.
    pub fn with_entry(mut self, key: &str, value: Value) -> Self {
        if let Self::Dictionary(entries) = &mut self {
            entries.insert(key.to_string(), value);
        }
        self
    }

    /// Builder-style push. Has no effect on anything but a list.
    pub fn with_value(mut self, value: Value) -> Self {
        if let Self::List(values) = &mut self {
            values.push(value);
        }
        self
    }

    pub fn get_entry(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Dictionary(entries) => entries.get(key),
            _ => None,
        }
    }

    pub fn remove_entry(&mut self, key: &str) -> Result<Value> {
        self.try_remove_entry(key)?
            .ok_or_else(|| anyhow!("missing entry {:?}", key))
    }

    pub fn try_remove_entry(&mut self, key: &str) -> Result<Option<Value>> {
        match self {
            Self::Dictionary(entries) => Ok(entries.remove(key)),
            _ => Err(anyhow!("expected a dictionary, got {}", self.kind())),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::List(_) => "list",
            Self::Dictionary(_) => "dictionary",
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::List(value)
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(bytes) => Ok(bytes),
            other => Err(anyhow!("expected a string, got {}", other.kind())),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let bytes: Vec<u8> = value.try_into()?;
        Ok(String::from_utf8(bytes)?)
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Integer(integer) => Ok(integer),
            other => Err(anyhow!("expected an integer, got {}", other.kind())),
        }
    }
}

impl TryFrom<Value> for usize {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let integer: i64 = value.try_into()?;
        Ok(usize::try_from(integer)?)
    }
}

impl TryFrom<Value> for u16 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let integer: i64 = value.try_into()?;
        Ok(u16::try_from(integer)?)
    }
}

impl TryFrom<Value> for Vec<Value> {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::List(values) => Ok(values),
            other => Err(anyhow!("expected a list, got {}", other.kind())),
        }
    }
}
