// tws_accounts/src/protocol_dec_parser.rs
// Field-level reader for NUL separated message bodies

use crate::base::IBKRError;

pub struct FieldParser<'a> {
  data: &'a [u8],
  fields: Vec<(usize, usize)>, // (start, end) of each NUL terminated field
  current_field: usize,
}

impl<'a> FieldParser<'a> {
  pub fn new(data: &'a [u8]) -> Self {
    let mut fields = Vec::new();
    let mut start = 0;
    for (i, b) in data.iter().enumerate() {
      if *b == 0 {
        fields.push((start, i));
        start = i + 1;
      }
    }
    // An unterminated tail still counts as a field.
    if start < data.len() {
      fields.push((start, data.len()));
    }
    FieldParser { data, fields, current_field: 0 }
  }

  fn field(&self, index: usize) -> Result<&'a str, IBKRError> {
    let (start, end) = *self.fields.get(index)
      .ok_or_else(|| IBKRError::ParseError(format!("Unexpected end of message at field {}", index)))?;
    let data: &'a [u8] = self.data;
    std::str::from_utf8(&data[start..end])
      .map_err(|e| IBKRError::ParseError(format!("Failed to parse string at field {}: {}", index, e)))
  }

  pub fn read_string(&mut self) -> Result<String, IBKRError> {
    let s = self.field(self.current_field)?;
    self.current_field += 1;
    Ok(s.to_string())
  }

  /// Empty fields read as 0, as TWS omits unset numbers.
  pub fn read_int(&mut self) -> Result<i32, IBKRError> {
    let s = self.read_string()?;
    if s.is_empty() {
      return Ok(0);
    }
    s.parse::<i32>()
      .map_err(|e| IBKRError::ParseError(format!("Failed to parse integer '{}': {}", s, e)))
  }

  pub fn read_double(&mut self) -> Result<f64, IBKRError> {
    let s = self.read_string()?;
    if s.is_empty() {
      return Ok(0.0);
    }
    s.parse::<f64>()
      .map_err(|e| IBKRError::ParseError(format!("Failed to parse double '{}': {}", s, e)))
  }

  pub fn read_bool(&mut self) -> Result<bool, IBKRError> {
    Ok(self.read_int()? != 0)
  }

  pub fn skip_field(&mut self) -> Result<(), IBKRError> {
    self.field(self.current_field)?;
    self.current_field += 1;
    Ok(())
  }

  pub fn remaining_fields(&self) -> usize {
    self.fields.len().saturating_sub(self.current_field)
  }
}
