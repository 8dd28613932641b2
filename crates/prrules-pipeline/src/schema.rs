//! Output schemas for every backend call, and the validators that turn raw
//! backend text into typed values.
//!
//! Each [`OutputSchema`] carries a JSON Schema document. Backends with native
//! structured output enforce it server-side; for the others it is embedded in
//! the instruction. Either way the response is validated here before anything
//! downstream sees it. Validation never fills in defaults for required data.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use prrules_types::{
    ComplianceAssessment, Finding, PrRulesError, RelevanceVerdict, Result, Section,
};

pub const RELEVANCE: &str = "relevance_verdict";
pub const ASSESSMENT: &str = "compliance_assessment";
pub const COORDINATION: &str = "coordination_plan";
pub const CONSULTATION: &str = "consultant_opinion";

// ---------------------------------------------------------------------------
// Auxiliary stage outputs
// ---------------------------------------------------------------------------

/// What the coordinator decided for one item in the hierarchical topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationPlan {
    /// Names of consultants to ask, each one declared in configuration.
    pub consult: Vec<String>,
    /// Whether the verification stage runs.
    pub verify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsultantOpinion {
    pub consultant: String,
    pub opinion: String,
}

// ---------------------------------------------------------------------------
// OutputSchema
// ---------------------------------------------------------------------------

/// A named JSON Schema a backend response must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputSchema {
    pub name: String,
    pub schema: Value,
}

impl OutputSchema {
    pub fn relevance() -> Self {
        Self {
            name: RELEVANCE.into(),
            schema: object(json!({
                "is_relevant": {
                    "type": "boolean",
                    "description": "Whether the rule is relevant to the contents of the change."
                }
            })),
        }
    }

    pub fn assessment() -> Self {
        let sections: Vec<&str> = Section::ALL.iter().map(|s| s.as_str()).collect();
        let finding = object(json!({
            "section": {
                "type": "string",
                "enum": sections,
                "description": "Part of the change that does not comply."
            },
            "file": {
                "type": ["string", "null"],
                "description": "Affected file. Only set when section is \"file\"."
            },
            "reason": {
                "type": "string",
                "description": "Why this part does not comply with the rule. Only state what fails; never restate what complies. Markdown allowed."
            },
            "suggested_changes": {
                "type": ["array", "null"],
                "items": { "type": "string" },
                "description": "Actionable instructions for the author. Markdown allowed."
            }
        }));

        Self {
            name: ASSESSMENT.into(),
            schema: object(json!({
                "complies": {
                    "type": "boolean",
                    "description": "True if the change complies with the rule."
                },
                "score": {
                    "type": "integer",
                    "description": "Adherence strength from 0 to 100."
                },
                "affected_sections": {
                    "type": "array",
                    "items": finding,
                    "description": "Empty when the rule is complied with, otherwise every non-complying part."
                }
            })),
        }
    }

    /// `consultants` are the names the coordinator may choose from.
    pub fn coordination(consultants: &[&str]) -> Self {
        let items = if consultants.is_empty() {
            json!({ "type": "string" })
        } else {
            json!({ "type": "string", "enum": consultants })
        };

        Self {
            name: COORDINATION.into(),
            schema: object(json!({
                "consult": {
                    "type": "array",
                    "items": items,
                    "description": "Consultants whose opinion should inform the compliance check."
                },
                "verify": {
                    "type": "boolean",
                    "description": "Whether a reviewer should verify the compliance assessment."
                }
            })),
        }
    }

    pub fn consultation() -> Self {
        Self {
            name: CONSULTATION.into(),
            schema: object(json!({
                "opinion": {
                    "type": "string",
                    "description": "Your opinion on how the change fares against the rule, limited to your area."
                }
            })),
        }
    }

    /// Instruction text describing the expected response shape.
    pub fn prompt_fragment(&self) -> String {
        let pretty = serde_json::to_string_pretty(&self.schema).unwrap_or_default();
        format!(
            "Respond with a single JSON object and nothing else. It must conform to this JSON Schema ({}):\n{}",
            self.name, pretty
        )
    }
}

/// An object schema with every property required and nothing else allowed.
fn object(properties: Value) -> Value {
    let required: Vec<String> = properties
        .as_object()
        .map(|p| p.keys().cloned().collect())
        .unwrap_or_default();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

struct Validator<'a> {
    schema: &'a str,
}

impl<'a> Validator<'a> {
    fn violation(&self, message: impl Into<String>) -> PrRulesError {
        PrRulesError::SchemaViolation {
            schema: self.schema.to_string(),
            message: message.into(),
        }
    }

    fn root(&self, raw: &str) -> Result<Map<String, Value>> {
        let text = strip_code_fence(raw);
        let value: Value = serde_json::from_str(text)
            .map_err(|e| self.violation(format!("response is not JSON: {e}")))?;
        match value {
            Value::Object(map) => Ok(map),
            other => Err(self.violation(format!("expected an object, got {}", kind(&other)))),
        }
    }

    fn field<'v>(&self, obj: &'v Map<String, Value>, path: &str, key: &str) -> Result<&'v Value> {
        match obj.get(key) {
            Some(v) => Ok(v),
            None => Err(self.violation(format!("missing required field `{path}{key}`"))),
        }
    }

    fn bool(&self, obj: &Map<String, Value>, path: &str, key: &str) -> Result<bool> {
        let v = self.field(obj, path, key)?;
        v.as_bool().ok_or_else(|| self.wrong_type(path, key, "boolean", v))
    }

    fn string(&self, obj: &Map<String, Value>, path: &str, key: &str) -> Result<String> {
        let v = self.field(obj, path, key)?;
        v.as_str()
            .map(String::from)
            .ok_or_else(|| self.wrong_type(path, key, "string", v))
    }

    /// Absent and `null` both mean "not given".
    fn optional<'v>(&self, obj: &'v Map<String, Value>, key: &str) -> Option<&'v Value> {
        obj.get(key).filter(|v| !v.is_null())
    }

    fn string_array(&self, v: &Value, path: &str, key: &str) -> Result<Vec<String>> {
        let items = v
            .as_array()
            .ok_or_else(|| self.wrong_type(path, key, "array", v))?;
        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_str().map(String::from).ok_or_else(|| {
                    self.violation(format!(
                        "`{path}{key}[{i}]` must be a string, got {}",
                        kind(item)
                    ))
                })
            })
            .collect()
    }

    fn wrong_type(&self, path: &str, key: &str, expected: &str, got: &Value) -> PrRulesError {
        self.violation(format!(
            "`{path}{key}` must be a {expected}, got {}",
            kind(got)
        ))
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Drop a single surrounding markdown code fence, if present.
fn strip_code_fence(raw: &str) -> &str {
    let text = raw.trim();
    if !text.starts_with("```") {
        return text;
    }
    let Some(first_newline) = text.find('\n') else {
        return text;
    };
    let inner = &text[first_newline + 1..];
    match inner.trim_end().strip_suffix("```") {
        Some(body) => body.trim(),
        None => text,
    }
}

pub fn parse_relevance(raw: &str) -> Result<RelevanceVerdict> {
    let v = Validator { schema: RELEVANCE };
    let root = v.root(raw)?;
    Ok(RelevanceVerdict {
        is_relevant: v.bool(&root, "", "is_relevant")?,
    })
}

pub fn parse_assessment(raw: &str) -> Result<ComplianceAssessment> {
    let v = Validator { schema: ASSESSMENT };
    let root = v.root(raw)?;

    let complies = v.bool(&root, "", "complies")?;

    let score_value = v.field(&root, "", "score")?;
    let score = score_value
        .as_u64()
        .ok_or_else(|| v.wrong_type("", "score", "non-negative integer", score_value))?;
    if score > 100 {
        return Err(v.violation(format!("`score` must be within 0..=100, got {score}")));
    }

    let mut findings = Vec::new();
    if let Some(sections) = v.optional(&root, "affected_sections") {
        let sections = sections
            .as_array()
            .ok_or_else(|| v.wrong_type("", "affected_sections", "array", sections))?;
        for (i, item) in sections.iter().enumerate() {
            let path = format!("affected_sections[{i}].");
            findings.push(parse_finding(&v, item, &path)?);
        }
    }

    if !complies && findings.is_empty() {
        return Err(v.violation("`affected_sections` must not be empty when `complies` is false"));
    }
    if complies && !findings.is_empty() {
        return Err(v.violation("`affected_sections` must be empty when `complies` is true"));
    }

    Ok(ComplianceAssessment {
        complies,
        score: score as u8,
        affected_sections: findings,
    })
}

fn parse_finding(v: &Validator<'_>, item: &Value, path: &str) -> Result<Finding> {
    let obj = item.as_object().ok_or_else(|| {
        v.violation(format!(
            "`{}` must be an object, got {}",
            path.trim_end_matches('.'),
            kind(item)
        ))
    })?;

    let section_name = v.string(obj, path, "section")?;
    let section = Section::parse(&section_name).ok_or_else(|| {
        v.violation(format!(
            "`{path}section` must be one of title, description, file, other; got \"{section_name}\""
        ))
    })?;

    let file = match v.optional(obj, "file") {
        Some(f) => Some(
            f.as_str()
                .map(String::from)
                .ok_or_else(|| v.wrong_type(path, "file", "string", f))?,
        ),
        None => None,
    };
    if file.is_some() && section != Section::File {
        return Err(v.violation(format!(
            "`{path}file` may only be set when section is \"file\", section is \"{section}\""
        )));
    }

    let reason = v.string(obj, path, "reason")?;
    if reason.trim().is_empty() {
        return Err(v.violation(format!("`{path}reason` must not be empty")));
    }

    let suggested_changes = match v.optional(obj, "suggested_changes") {
        Some(list) => v.string_array(list, path, "suggested_changes")?,
        None => Vec::new(),
    };

    Ok(Finding {
        section,
        file,
        reason,
        suggested_changes,
    })
}

/// `allowed` are the consultant names that may appear in the plan.
pub fn parse_plan(raw: &str, allowed: &[&str]) -> Result<CoordinationPlan> {
    let v = Validator {
        schema: COORDINATION,
    };
    let root = v.root(raw)?;

    let consult_value = v.field(&root, "", "consult")?;
    let names = v.string_array(consult_value, "", "consult")?;
    let verify = v.bool(&root, "", "verify")?;

    let mut consult: Vec<String> = Vec::new();
    for name in names {
        if !allowed.contains(&name.as_str()) {
            return Err(v.violation(format!("`consult` names unknown consultant \"{name}\"")));
        }
        if !consult.contains(&name) {
            consult.push(name);
        }
    }

    Ok(CoordinationPlan { consult, verify })
}

pub fn parse_opinion(raw: &str, consultant: &str) -> Result<ConsultantOpinion> {
    let v = Validator {
        schema: CONSULTATION,
    };
    let root = v.root(raw)?;
    Ok(ConsultantOpinion {
        consultant: consultant.to_string(),
        opinion: v.string(&root, "", "opinion")?,
    })
}
