// ABOUTME: Payload a step returns on success.
// ABOUTME: A short message plus string-keyed JSON data recorded in the step result.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    pub message: String,
    pub data: Map<String, Value>,
}

impl StepOutput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: Map::new(),
        }
    }

    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}
