//! Typed action parameters.
//!
//! A declared parameter is either a free text input (pattern-eligible) or a selectable one
//! (`select`, `radio`, `checkbox`) that must carry options. The partition is decided once when the
//! wire parameter is parsed and is carried by [`ParameterKind`] afterwards.
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::{
    dto::{Bound, ParameterOption, ParameterType, ParameterValue, WireParameter},
    models::error::{ParseError, ValidationError},
};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputType {
    Text,
    Email,
    Url,
    Number,
    Date,
    DatetimeLocal,
    Textarea,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectType {
    Select,
    Radio,
    Checkbox,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "category", rename_all = "kebab-case")]
pub enum ParameterKind {
    Input {
        input: InputType,
        pattern: Option<String>,
        pattern_description: Option<String>,
    },
    Selectable {
        input: SelectType,
        options: Vec<ParameterOption>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,
    pub label: Option<String>,
    pub required: bool,
    pub min: Option<Bound>,
    pub max: Option<Bound>,
    pub kind: ParameterKind,
}

impl TryFrom<WireParameter> for Parameter {
    type Error = ParseError;

    fn try_from(value: WireParameter) -> Result<Self, Self::Error> {
        let select = match value.kind {
            ParameterType::Select => Some(SelectType::Select),
            ParameterType::Radio => Some(SelectType::Radio),
            ParameterType::Checkbox => Some(SelectType::Checkbox),
            _ => None,
        };

        let kind = match select {
            Some(input) => {
                let options = value
                    .options
                    .filter(|options| !options.is_empty())
                    .ok_or_else(|| {
                        ParseError::MissingOptions(value.name.clone(), value.kind.to_string())
                    })?;
                if value.pattern.is_some() {
                    warn!(name = %value.name, "Ignoring pattern declared on selectable parameter");
                }
                ParameterKind::Selectable { input, options }
            }
            None => {
                if value
                    .options
                    .as_ref()
                    .is_some_and(|options| !options.is_empty())
                {
                    return Err(ParseError::UnexpectedOptions(value.name, value.kind.to_string()));
                }
                let input = match value.kind {
                    ParameterType::Email => InputType::Email,
                    ParameterType::Url => InputType::Url,
                    ParameterType::Number => InputType::Number,
                    ParameterType::Date => InputType::Date,
                    ParameterType::DatetimeLocal => InputType::DatetimeLocal,
                    ParameterType::Textarea => InputType::Textarea,
                    _ => InputType::Text,
                };
                ParameterKind::Input {
                    input,
                    pattern: value.pattern,
                    pattern_description: value.pattern_description,
                }
            }
        };

        Ok(Parameter {
            name: value.name,
            label: value.label,
            required: value.required,
            min: value.min,
            max: value.max,
            kind,
        })
    }
}

/// True iff the parameter is a free text input that may carry a pattern.
pub fn is_pattern_eligible(parameter: &Parameter) -> bool {
    matches!(parameter.kind, ParameterKind::Input { .. })
}

/// True iff the parameter is `select`, `radio` or `checkbox`.
pub fn is_selectable(parameter: &Parameter) -> bool {
    !is_pattern_eligible(parameter)
}

impl Parameter {
    /// The declared type.
    pub fn parameter_type(&self) -> ParameterType {
        match &self.kind {
            ParameterKind::Input { input, .. } => match input {
                InputType::Text => ParameterType::Text,
                InputType::Email => ParameterType::Email,
                InputType::Url => ParameterType::Url,
                InputType::Number => ParameterType::Number,
                InputType::Date => ParameterType::Date,
                InputType::DatetimeLocal => ParameterType::DatetimeLocal,
                InputType::Textarea => ParameterType::Textarea,
            },
            ParameterKind::Selectable { input, .. } => match input {
                SelectType::Select => ParameterType::Select,
                SelectType::Radio => ParameterType::Radio,
                SelectType::Checkbox => ParameterType::Checkbox,
            },
        }
    }

    /// Options of a selectable parameter; `None` for free text inputs.
    pub fn as_selectable(&self) -> Option<&[ParameterOption]> {
        match &self.kind {
            ParameterKind::Selectable { options, .. } => Some(options),
            ParameterKind::Input { .. } => None,
        }
    }

    pub fn placeholder(&self) -> String {
        format!("{{{}}}", self.name)
    }

    /// Checks a value against the declared constraints. `None` means nothing was entered.
    pub fn validate(&self, value: Option<&ParameterValue>) -> Result<(), ValidationError> {
        let value = match value.filter(|v| !v.is_blank()) {
            Some(value) => value,
            None if self.required => return Err(ValidationError::Required(self.name.clone())),
            None => return Ok(()),
        };

        match &self.kind {
            ParameterKind::Input { input, pattern, pattern_description } => {
                let ParameterValue::Text(text) = value else {
                    return Err(ValidationError::UnexpectedList(self.name.clone()));
                };
                let text = text.trim();
                if let Some(pattern) = pattern {
                    let re = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
                        ValidationError::InvalidPattern(self.name.clone(), e.to_string())
                    })?;
                    if !re.is_match(text) {
                        return Err(ValidationError::PatternMismatch {
                            name: self.name.clone(),
                            description: pattern_description.clone(),
                        });
                    }
                }
                self.validate_input(*input, text)
            }
            ParameterKind::Selectable { input, options } => {
                let selected: Vec<&str> = match value {
                    ParameterValue::Text(text) => vec![text.as_str()],
                    ParameterValue::List(values) if *input == SelectType::Checkbox => values
                        .iter()
                        .map(String::as_str)
                        .collect(),
                    ParameterValue::List(_) => {
                        return Err(ValidationError::UnexpectedList(self.name.clone()))
                    }
                };
                if let Some(unknown) = selected
                    .iter()
                    .find(|s| !options.iter().any(|o| o.value == **s))
                {
                    return Err(ValidationError::UnknownOption(unknown.to_string()));
                }
                if *input == SelectType::Checkbox {
                    self.check_numeric_bounds(selected.len() as f64)?;
                }
                Ok(())
            }
        }
    }

    fn validate_input(&self, input: InputType, text: &str) -> Result<(), ValidationError> {
        match input {
            InputType::Text | InputType::Textarea => {
                self.check_numeric_bounds(text.chars().count() as f64)
            }
            InputType::Number => {
                let number: f64 = text
                    .parse()
                    .map_err(|_| ValidationError::NotANumber(self.name.clone()))?;
                self.check_numeric_bounds(number)
            }
            InputType::Email => {
                let mut parts = text.splitn(2, '@');
                let (local, domain) = (parts.next().unwrap_or_default(), parts.next());
                let valid = !local.is_empty() &&
                    !text.contains(char::is_whitespace) &&
                    domain.is_some_and(|d| {
                        !d.contains('@') &&
                            d.split('.').count() > 1 &&
                            d.split('.').all(|l| !l.is_empty())
                    });
                if valid {
                    Ok(())
                } else {
                    Err(ValidationError::InvalidFormat(self.name.clone(), "email".to_string()))
                }
            }
            InputType::Url => url::Url::parse(text)
                .map(|_| ())
                .map_err(|_| ValidationError::InvalidFormat(self.name.clone(), "url".to_string())),
            InputType::Date => {
                let parse = |s: &str| NaiveDate::parse_from_str(s, DATE_FORMAT).ok();
                let date = parse(text).ok_or_else(|| {
                    ValidationError::InvalidFormat(self.name.clone(), "date".to_string())
                })?;
                self.check_ordered_bounds(date, parse)
            }
            InputType::DatetimeLocal => {
                let parse = |s: &str| {
                    DATETIME_FORMATS
                        .iter()
                        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                };
                let datetime = parse(text).ok_or_else(|| {
                    ValidationError::InvalidFormat(self.name.clone(), "datetime".to_string())
                })?;
                self.check_ordered_bounds(datetime, parse)
            }
        }
    }

    fn check_numeric_bounds(&self, value: f64) -> Result<(), ValidationError> {
        self.check_ordered_bounds(value, |s| s.trim().parse::<f64>().ok())
    }

    fn check_ordered_bounds<T, F>(&self, value: T, parse: F) -> Result<(), ValidationError>
    where
        T: PartialOrd,
        F: Fn(&str) -> Option<T>,
    {
        let bound = |b: &Bound| match b {
            Bound::Text(s) => parse(s),
            Bound::Number(n) => parse(&n.to_string()),
        };
        if let Some(min) = self.min.as_ref() {
            if bound(min).is_some_and(|min| value < min) {
                return Err(ValidationError::BelowMinimum {
                    name: self.name.clone(),
                    min: min.to_string(),
                });
            }
        }
        if let Some(max) = self.max.as_ref() {
            if bound(max).is_some_and(|max| value > max) {
                return Err(ValidationError::AboveMaximum {
                    name: self.name.clone(),
                    max: max.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn wire(kind: ParameterType) -> WireParameter {
        WireParameter {
            name: "amount".to_string(),
            label: Some("Amount".to_string()),
            kind,
            required: false,
            min: None,
            max: None,
            pattern: None,
            pattern_description: None,
            options: None,
        }
    }

    fn options() -> Vec<ParameterOption> {
        ["a", "b", "c"]
            .into_iter()
            .map(|v| ParameterOption { label: v.to_uppercase(), value: v.to_string(), selected: false })
            .collect()
    }

    #[rstest]
    #[case(ParameterType::Text)]
    #[case(ParameterType::Email)]
    #[case(ParameterType::Url)]
    #[case(ParameterType::Number)]
    #[case(ParameterType::Date)]
    #[case(ParameterType::DatetimeLocal)]
    #[case(ParameterType::Textarea)]
    #[case(ParameterType::Select)]
    #[case(ParameterType::Radio)]
    #[case(ParameterType::Checkbox)]
    fn test_partition_is_exclusive(#[case] kind: ParameterType) {
        let mut wire = wire(kind);
        let selectable =
            matches!(kind, ParameterType::Select | ParameterType::Radio | ParameterType::Checkbox);
        if selectable {
            wire.options = Some(options());
        }

        let parameter = Parameter::try_from(wire).expect("parse");

        assert_ne!(is_pattern_eligible(&parameter), is_selectable(&parameter));
        assert_eq!(is_selectable(&parameter), selectable);
        assert_eq!(parameter.as_selectable().is_some(), selectable);
        assert_eq!(parameter.parameter_type(), kind);
    }

    #[test]
    fn test_selectable_without_options_is_rejected() {
        let err = Parameter::try_from(wire(ParameterType::Radio)).unwrap_err();

        assert_eq!(err, ParseError::MissingOptions("amount".to_string(), "radio".to_string()));
    }

    #[test]
    fn test_input_with_options_is_rejected() {
        let mut wire = wire(ParameterType::Text);
        wire.options = Some(options());

        assert!(matches!(Parameter::try_from(wire), Err(ParseError::UnexpectedOptions(..))));
    }

    #[test]
    fn test_required() {
        let mut wire = wire(ParameterType::Text);
        wire.required = true;
        let parameter = Parameter::try_from(wire).unwrap();

        assert_eq!(parameter.validate(None), Err(ValidationError::Required("amount".to_string())));
        assert_eq!(
            parameter.validate(Some(&"  ".into())),
            Err(ValidationError::Required("amount".to_string()))
        );
        assert_eq!(parameter.validate(Some(&"x".into())), Ok(()));
    }

    #[test]
    fn test_pattern_matches_whole_value() {
        let mut wire = wire(ParameterType::Text);
        wire.pattern = Some("[0-9]+".to_string());
        wire.pattern_description = Some("digits only".to_string());
        let parameter = Parameter::try_from(wire).unwrap();

        assert_eq!(parameter.validate(Some(&"123".into())), Ok(()));
        let err = parameter
            .validate(Some(&"12a".into()))
            .unwrap_err();
        assert_eq!(err.to_string(), "`amount` does not match the expected format: digits only");
    }

    #[rstest]
    #[case("0.5", Ok(()))]
    #[case("0.05", Err(ValidationError::BelowMinimum { name: "amount".to_string(), min: "0.1".to_string() }))]
    #[case("11", Err(ValidationError::AboveMaximum { name: "amount".to_string(), max: "10".to_string() }))]
    #[case("ten", Err(ValidationError::NotANumber("amount".to_string())))]
    fn test_number_bounds(#[case] input: &str, #[case] expected: Result<(), ValidationError>) {
        let mut wire = wire(ParameterType::Number);
        wire.min = Some(Bound::Number(0.1));
        wire.max = Some(Bound::Text("10".to_string()));
        let parameter = Parameter::try_from(wire).unwrap();

        assert_eq!(parameter.validate(Some(&input.into())), expected);
    }

    #[rstest]
    #[case(ParameterType::Email, "user@example.com", true)]
    #[case(ParameterType::Email, "user@example", false)]
    #[case(ParameterType::Email, "user example@x.io", false)]
    #[case(ParameterType::Url, "https://example.com/a", true)]
    #[case(ParameterType::Url, "example", false)]
    #[case(ParameterType::Date, "2024-02-29", true)]
    #[case(ParameterType::Date, "2023-02-29", false)]
    #[case(ParameterType::DatetimeLocal, "2024-01-01T10:30", true)]
    #[case(ParameterType::DatetimeLocal, "2024-01-01 10:30", false)]
    fn test_formats(#[case] kind: ParameterType, #[case] input: &str, #[case] valid: bool) {
        let parameter = Parameter::try_from(wire(kind)).unwrap();

        assert_eq!(
            parameter
                .validate(Some(&input.into()))
                .is_ok(),
            valid
        );
    }

    #[test]
    fn test_date_bounds() {
        let mut wire = wire(ParameterType::Date);
        wire.min = Some(Bound::Text("2024-01-01".to_string()));
        let parameter = Parameter::try_from(wire).unwrap();

        assert!(parameter
            .validate(Some(&"2023-12-31".into()))
            .is_err());
        assert!(parameter
            .validate(Some(&"2024-01-01".into()))
            .is_ok());
    }

    #[test]
    fn test_selectables() {
        let mut radio = wire(ParameterType::Radio);
        radio.options = Some(options());
        let radio = Parameter::try_from(radio).unwrap();
        assert_eq!(radio.validate(Some(&"b".into())), Ok(()));
        assert_eq!(
            radio.validate(Some(&"z".into())),
            Err(ValidationError::UnknownOption("z".to_string()))
        );
        assert_eq!(
            radio.validate(Some(&vec!["a".to_string()].into())),
            Err(ValidationError::UnexpectedList("amount".to_string()))
        );

        let mut checkbox = wire(ParameterType::Checkbox);
        checkbox.options = Some(options());
        checkbox.max = Some(Bound::Number(2.0));
        let checkbox = Parameter::try_from(checkbox).unwrap();
        assert_eq!(checkbox.validate(Some(&vec!["a".to_string(), "c".to_string()].into())), Ok(()));
        assert!(matches!(
            checkbox.validate(Some(&vec!["a".to_string(), "b".to_string(), "c".to_string()].into())),
            Err(ValidationError::AboveMaximum { .. })
        ));
    }
}
