use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecodeError;

/// The provider's `parameter` object for one contract, kept as-is.
///
/// Nothing reads the raw JSON directly; every field goes through the
/// fallible accessors on [`ParamView`] so a missing or mistyped field is a
/// [`DecodeError`] rather than a silent default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractParams(Value);

impl ContractParams {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn view(&self) -> ParamView<'_> {
        ParamView { value: &self.0 }
    }
}

impl From<Value> for ContractParams {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Borrowed cursor into a [`ContractParams`] tree.
#[derive(Debug, Clone, Copy)]
pub struct ParamView<'a> {
    value: &'a Value,
}

impl<'a> ParamView<'a> {
    fn field(&self, field: &'static str) -> Result<&'a Value, DecodeError> {
        let object = self.value.as_object().ok_or(DecodeError::WrongType {
            field,
            expected: "object container",
        })?;
        match object.get(field) {
            None | Some(Value::Null) => Err(DecodeError::MissingField(field)),
            Some(v) => Ok(v),
        }
    }

    pub fn get_nested(&self, field: &'static str) -> Result<ParamView<'a>, DecodeError> {
        let value = self.field(field)?;
        if !value.is_object() {
            return Err(DecodeError::WrongType {
                field,
                expected: "object",
            });
        }
        Ok(ParamView { value })
    }

    pub fn get_str(&self, field: &'static str) -> Result<&'a str, DecodeError> {
        self.field(field)?.as_str().ok_or(DecodeError::WrongType {
            field,
            expected: "string",
        })
    }

    pub fn get_u64(&self, field: &'static str) -> Result<u64, DecodeError> {
        self.field(field)?.as_u64().ok_or(DecodeError::WrongType {
            field,
            expected: "unsigned integer",
        })
    }
}
