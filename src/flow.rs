//! Flow definition documents (v0.1)
//!
//! A flow arrives as an opaque serialized blob and is decoded exactly once,
//! when execution starts. The task layer never interprets step
//! configuration; it only needs names, wiring, and start points.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TaskError;

/// A decoded flow: named steps wired by their declared inputs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Flow {
    #[serde(default)]
    pub name: String,

    pub steps: Vec<StepSpec>,
}

/// One processing step in a flow.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepSpec {
    /// Display name, unique within the flow.
    pub name: String,

    /// Step type identifier, resolved by the execution engine.
    pub kind: String,

    /// Step configuration, opaque to the task layer.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,

    /// Names of upstream steps this step consumes from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
}

impl Flow {
    /// Decode a serialized flow document.
    pub fn from_json(json: &str) -> Result<Self, TaskError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn step(&self, name: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Steps with no declared inputs. These are the launch points the
    /// engine starts sequentially or concurrently, per the run options.
    pub fn start_points(&self) -> Vec<&StepSpec> {
        self.steps.iter().filter(|s| s.inputs.is_empty()).collect()
    }
}

impl StepSpec {
    /// Render the options block as `key=value` pairs for log prefixes,
    /// `None` when the step has no configuration.
    pub fn options_summary(&self) -> Option<String> {
        if self.options.is_empty() {
            return None;
        }
        let pairs: Vec<String> = self
            .options
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{}={}", k, s),
                other => format!("{}={}", k, other),
            })
            .collect();
        Some(pairs.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_STEP_FLOW: &str = r#"{
        "name": "csv-to-model",
        "steps": [
            {"name": "load", "kind": "csv-loader", "options": {"path": "in.csv"}},
            {"name": "train", "kind": "trainer", "inputs": ["load"]}
        ]
    }"#;

    #[test]
    fn decode_two_step_flow() {
        let flow = Flow::from_json(TWO_STEP_FLOW).unwrap();
        assert_eq!(flow.name, "csv-to-model");
        assert_eq!(flow.steps.len(), 2);
        assert_eq!(flow.step("train").unwrap().inputs, vec!["load"]);
        assert!(flow.step("missing").is_none());
    }

    #[test]
    fn start_points_have_no_inputs() {
        let flow = Flow::from_json(TWO_STEP_FLOW).unwrap();
        let starts = flow.start_points();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].name, "load");
    }

    #[test]
    fn malformed_document_is_a_decode_error() {
        let err = Flow::from_json("{ not json").unwrap_err();
        assert!(matches!(err, TaskError::Decode(_)));

        // structurally valid JSON that is not a flow fails the same way
        let err = Flow::from_json(r#"{"steps": 42}"#).unwrap_err();
        assert!(matches!(err, TaskError::Decode(_)));
    }

    #[test]
    fn options_summary_formats_pairs() {
        let flow = Flow::from_json(TWO_STEP_FLOW).unwrap();
        assert_eq!(
            flow.step("load").unwrap().options_summary().as_deref(),
            Some("path=in.csv")
        );
        assert!(flow.step("train").unwrap().options_summary().is_none());
    }
}
