// The fields of the questionnaires and of the rating scales.

use crate::survey::*;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

// Slider values are compared to the steps with this tolerance.
const STEP_EPSILON: f64 = 1e-9;

/// All the kinds of fields that a questionnaire can contain.
///
/// Adding a kind of field means adding a variant here, with its declaration checks
/// and its validation.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FieldKind {
    #[serde(rename = "text")]
    Text {
        #[serde(rename = "maxLength")]
        max_length: Option<usize>,
    },
    #[serde(rename = "multipleChoice")]
    MultipleChoice { options: Vec<String> },
    #[serde(rename = "numeric")]
    Numeric { min: Option<f64>, max: Option<f64> },
    /// Integer scale (Likert-like). The labels, if any, name every point of the scale.
    #[serde(rename = "discreteScale")]
    DiscreteScale {
        min: i64,
        max: i64,
        labels: Option<Vec<String>>,
    },
    #[serde(rename = "sliderScale")]
    SliderScale { min: f64, max: f64, step: f64 },
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(flatten)]
    pub kind: FieldKind,
}

/// A validated answer.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Number(f64),
    Text(String),
}

impl FieldConfig {
    /// Checks the declaration of the field, independently of any answer.
    pub fn check(&self) -> SurveyResult<()> {
        let field = self.name.clone();
        ensure!(
            !field.trim().is_empty(),
            InvalidFieldSnafu {
                field,
                message: "empty name"
            }
        );
        match &self.kind {
            FieldKind::Text { max_length } => {
                ensure!(
                    *max_length != Some(0),
                    InvalidFieldSnafu {
                        field,
                        message: "maxLength must be positive"
                    }
                );
            }
            FieldKind::MultipleChoice { options } => {
                ensure!(
                    !options.is_empty(),
                    InvalidFieldSnafu {
                        field,
                        message: "no option declared"
                    }
                );
                let unique: HashSet<&String> = options.iter().collect();
                ensure!(
                    unique.len() == options.len(),
                    InvalidFieldSnafu {
                        field,
                        message: "duplicate options"
                    }
                );
            }
            FieldKind::Numeric {
                min: Some(min),
                max: Some(max),
            } => {
                ensure!(
                    min <= max,
                    InvalidFieldSnafu {
                        field,
                        message: format!("min {} is larger than max {}", min, max)
                    }
                );
            }
            FieldKind::Numeric { .. } => {}
            FieldKind::DiscreteScale { min, max, labels } => {
                ensure!(
                    min < max,
                    InvalidFieldSnafu {
                        field,
                        message: format!("min {} must be smaller than max {}", min, max)
                    }
                );
                let points = max
                    .checked_sub(*min)
                    .and_then(|d| d.checked_add(1))
                    .and_then(|n| usize::try_from(n).ok());
                let points = match points {
                    Some(n) => n,
                    None => {
                        return InvalidFieldSnafu {
                            field,
                            message: format!("the scale {} .. {} is too large", min, max),
                        }
                        .fail()
                    }
                };
                if let Some(labels) = labels {
                    let expected = points;
                    ensure!(
                        labels.len() == expected,
                        InvalidFieldSnafu {
                            field,
                            message: format!(
                                "{} labels declared for a scale of {} points",
                                labels.len(),
                                expected
                            )
                        }
                    );
                }
            }
            FieldKind::SliderScale { min, max, step } => {
                ensure!(
                    min.is_finite() && max.is_finite() && min < max,
                    InvalidFieldSnafu {
                        field,
                        message: format!("invalid range {} .. {}", min, max)
                    }
                );
                ensure!(
                    step.is_finite() && *step > 0.0,
                    InvalidFieldSnafu {
                        field,
                        message: format!("step must be positive, got {}", step)
                    }
                );
            }
        }
        Ok(())
    }

    /// Validates the raw answer given for this field.
    ///
    /// Returns None for a blank answer to an optional field.
    pub fn validate(&self, raw: Option<&str>) -> SurveyResult<Option<AnswerValue>> {
        let field = self.name.clone();
        let s = match raw.map(|s| s.trim()) {
            Some(s) if !s.is_empty() => s,
            _ if self.required => {
                return InvalidAnswerSnafu {
                    field,
                    message: "an answer is required",
                }
                .fail()
            }
            _ => return Ok(None),
        };
        let res = match &self.kind {
            FieldKind::Text { max_length } => {
                if let Some(m) = max_length {
                    ensure!(
                        s.chars().count() <= *m,
                        InvalidAnswerSnafu {
                            field,
                            message: format!("longer than {} characters", m)
                        }
                    );
                }
                AnswerValue::Text(s.to_string())
            }
            FieldKind::MultipleChoice { options } => {
                ensure!(
                    options.iter().any(|o| o == s),
                    InvalidAnswerSnafu {
                        field,
                        message: format!("{:?} is not one of {:?}", s, options)
                    }
                );
                AnswerValue::Text(s.to_string())
            }
            FieldKind::Numeric { min, max } => {
                let x = parse_number(&field, s)?;
                ensure!(
                    min.map(|m| x >= m).unwrap_or(true) && max.map(|m| x <= m).unwrap_or(true),
                    InvalidAnswerSnafu {
                        field,
                        message: format!("{} is out of range", x)
                    }
                );
                AnswerValue::Number(x)
            }
            FieldKind::DiscreteScale { min, max, labels } => {
                // The label of a point is accepted in place of its value.
                let from_label = labels
                    .as_ref()
                    .and_then(|ls| ls.iter().position(|l| l == s))
                    .map(|idx| min + idx as i64);
                let x = match from_label {
                    Some(x) => x,
                    None => s.parse::<i64>().ok().context(InvalidAnswerSnafu {
                        field: field.clone(),
                        message: format!("{:?} is not a point of the scale", s),
                    })?,
                };
                ensure!(
                    x >= *min && x <= *max,
                    InvalidAnswerSnafu {
                        field,
                        message: format!("{} is not within {} .. {}", x, min, max)
                    }
                );
                AnswerValue::Number(x as f64)
            }
            FieldKind::SliderScale { min, max, step } => {
                let x = parse_number(&field, s)?;
                ensure!(
                    x >= *min && x <= *max,
                    InvalidAnswerSnafu {
                        field: field.clone(),
                        message: format!("{} is not within {} .. {}", x, min, max)
                    }
                );
                let steps = (x - min) / step;
                ensure!(
                    (steps - steps.round()).abs() < STEP_EPSILON,
                    InvalidAnswerSnafu {
                        field,
                        message: format!("{} is not a multiple of the step {}", x, step)
                    }
                );
                AnswerValue::Number(x)
            }
        };
        Ok(Some(res))
    }
}

fn parse_number(field: &str, s: &str) -> SurveyResult<f64> {
    s.parse::<f64>()
        .ok()
        .filter(|x| x.is_finite())
        .context(InvalidAnswerSnafu {
            field,
            message: format!("{:?} is not a number", s),
        })
}

/// Checks the declarations of a list of fields. The names must be unique.
pub fn check_fields(fields: &[FieldConfig]) -> SurveyResult<()> {
    let mut names: HashSet<&str> = HashSet::new();
    for f in fields.iter() {
        f.check()?;
        ensure!(
            names.insert(f.name.as_str()),
            InvalidFieldSnafu {
                field: f.name.clone(),
                message: "declared twice"
            }
        );
    }
    Ok(())
}

/// Validates all the answers for a list of fields.
///
/// Every answer must correspond to a declared field. The optional fields left blank
/// are not present in the output.
pub fn validate_answers(
    fields: &[FieldConfig],
    answers: &BTreeMap<String, String>,
) -> SurveyResult<BTreeMap<String, AnswerValue>> {
    if let Some(name) = answers
        .keys()
        .find(|k| !fields.iter().any(|f| &f.name == *k))
    {
        return InvalidAnswerSnafu {
            field: name.clone(),
            message: "no such field",
        }
        .fail();
    }
    let mut res: BTreeMap<String, AnswerValue> = BTreeMap::new();
    for f in fields.iter() {
        let raw = answers.get(&f.name).map(|s| s.as_str());
        if let Some(v) = f.validate(raw)? {
            res.insert(f.name.clone(), v);
        }
    }
    debug!("validate_answers: {:?}", res);
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(kind: FieldKind, required: bool) -> FieldConfig {
        FieldConfig {
            name: "f".to_string(),
            label: "F".to_string(),
            required,
            kind,
        }
    }

    #[test]
    fn reads_declarations() {
        let js = r#"[
            {"type": "text", "name": "comment", "label": "Comment"},
            {"type": "multipleChoice", "name": "gender", "label": "Gender", "required": true,
             "options": ["f", "m", "d"]},
            {"type": "numeric", "name": "age", "label": "Age", "min": 18},
            {"type": "sliderScale", "name": "confidence", "label": "Confidence",
             "min": 0.0, "max": 1.0, "step": 0.1}
        ]"#;
        let fields: Vec<FieldConfig> = serde_json::from_str(js).unwrap();
        assert_eq!(fields.len(), 4);
        assert!(!fields[0].required);
        assert_eq!(fields[0].kind, FieldKind::Text { max_length: None });
        assert_eq!(
            fields[2].kind,
            FieldKind::Numeric {
                min: Some(18.0),
                max: None
            }
        );
        check_fields(&fields).unwrap();
    }

    #[test]
    fn bad_declarations() {
        let scale = FieldKind::DiscreteScale {
            min: 1,
            max: 3,
            labels: Some(vec!["low".to_string(), "high".to_string()]),
        };
        assert!(field(scale, true).check().is_err());
        let huge = FieldKind::DiscreteScale {
            min: i64::MIN,
            max: i64::MAX,
            labels: None,
        };
        assert!(matches!(
            field(huge, true).check(),
            Err(SurveyError::InvalidField { .. })
        ));
        let wide = FieldKind::DiscreteScale {
            min: -1000,
            max: 1000,
            labels: None,
        };
        assert!(field(wide, true).check().is_ok());
        let slider = FieldKind::SliderScale {
            min: 0.0,
            max: 1.0,
            step: 0.0,
        };
        assert!(field(slider, true).check().is_err());
        let choice = FieldKind::MultipleChoice { options: vec![] };
        assert!(field(choice, true).check().is_err());
        let text = FieldKind::Text { max_length: None };
        let twice = vec![field(text.clone(), true), field(text, false)];
        assert!(check_fields(&twice).is_err());
    }

    #[test]
    fn required_answers() {
        let f = field(FieldKind::Text { max_length: Some(5) }, true);
        assert!(f.validate(None).is_err());
        assert!(f.validate(Some("  ")).is_err());
        assert!(f.validate(Some("too long")).is_err());
        assert_eq!(
            f.validate(Some(" ok ")).unwrap(),
            Some(AnswerValue::Text("ok".to_string()))
        );
        let optional = field(FieldKind::Text { max_length: None }, false);
        assert_eq!(optional.validate(None).unwrap(), None);
    }

    #[test]
    fn scale_answers() {
        let f = field(
            FieldKind::DiscreteScale {
                min: 1,
                max: 3,
                labels: Some(vec![
                    "low".to_string(),
                    "mid".to_string(),
                    "high".to_string(),
                ]),
            },
            true,
        );
        assert_eq!(f.validate(Some("2")).unwrap(), Some(AnswerValue::Number(2.0)));
        assert_eq!(
            f.validate(Some("high")).unwrap(),
            Some(AnswerValue::Number(3.0))
        );
        assert!(f.validate(Some("4")).is_err());
        assert!(f.validate(Some("2.5")).is_err());

        let slider = field(
            FieldKind::SliderScale {
                min: 0.0,
                max: 1.0,
                step: 0.25,
            },
            true,
        );
        assert_eq!(
            slider.validate(Some("0.75")).unwrap(),
            Some(AnswerValue::Number(0.75))
        );
        assert!(slider.validate(Some("0.3")).is_err());
        assert!(slider.validate(Some("1.25")).is_err());
        assert!(slider.validate(Some("NaN")).is_err());
    }

    #[test]
    fn choice_and_numeric_answers() {
        let choice = field(
            FieldKind::MultipleChoice {
                options: vec!["yes".to_string(), "no".to_string()],
            },
            true,
        );
        assert!(choice.validate(Some("maybe")).is_err());
        assert_eq!(
            choice.validate(Some("no")).unwrap(),
            Some(AnswerValue::Text("no".to_string()))
        );
        let age = field(
            FieldKind::Numeric {
                min: Some(18.0),
                max: Some(99.0),
            },
            false,
        );
        assert!(age.validate(Some("17")).is_err());
        assert_eq!(age.validate(Some("42")).unwrap(), Some(AnswerValue::Number(42.0)));
    }

    #[test]
    fn unknown_answers_are_rejected() {
        let fields = vec![field(FieldKind::Text { max_length: None }, false)];
        let mut answers = BTreeMap::new();
        answers.insert("g".to_string(), "x".to_string());
        assert!(validate_answers(&fields, &answers).is_err());
        answers.clear();
        assert!(validate_answers(&fields, &answers).unwrap().is_empty());
        answers.insert("f".to_string(), "hello".to_string());
        assert_eq!(validate_answers(&fields, &answers).unwrap().len(), 1);
    }
}
