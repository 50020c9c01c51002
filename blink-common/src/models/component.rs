//! Triggerable units of an action.
//!
//! Components are a closed set of variants. Every consumption site (href derivation, body
//! building, descriptors) matches on [`Component`] exhaustively.
use std::{
    collections::{BTreeMap, HashSet},
    fmt,
};

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

use crate::{
    dto::{
        ActionPostRequest, ActionPostResponse, LinkedAction, ParameterType, ParameterValue,
    },
    models::{
        error::{ClientError, ParseError, ValidationError},
        parameter::Parameter,
    },
    traits::ActionClient,
};

/// Characters left untouched by `encodeURIComponent`.
const COMPONENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Identity of one resolved action. A refresh or a chain step produces a new key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionKey {
    pub url: Url,
    pub id: Uuid,
}

impl ActionKey {
    pub fn new(url: Url) -> Self {
        Self { url, id: Uuid::new_v4() }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.url, self.id)
    }
}

/// Index of a component within its action's component list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub usize);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Values applied onto a component right before it is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentValues {
    Single(String),
    Multi(Vec<String>),
    Form(BTreeMap<String, ParameterValue>),
}

/// Fields every variant carries.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentBase {
    /// Owning action, used as a lookup key only.
    pub parent: ActionKey,
    pub id: ComponentId,
    pub label: String,
    /// Href template, possibly containing `{name}` placeholders.
    pub href: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ButtonComponent {
    pub base: ComponentBase,
    /// Set when the button was derived from an input component; execution is proxied there.
    pub source: Option<ComponentId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SingleValueComponent {
    pub base: ComponentBase,
    pub parameter: Parameter,
    value: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiValueComponent {
    pub base: ComponentBase,
    pub parameter: Parameter,
    value: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormComponent {
    pub base: ComponentBase,
    pub parameters: Vec<Parameter>,
    values: BTreeMap<String, ParameterValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Component {
    Button(ButtonComponent),
    SingleValue(SingleValueComponent),
    MultiValue(MultiValueComponent),
    Form(FormComponent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentKind {
    Button,
    SingleValue,
    MultiValue,
    Form,
}

fn substitute(template: &str, placeholder: &str, value: &ParameterValue) -> String {
    let encoded = utf8_percent_encode(&value.to_href_segment(), COMPONENT_ENCODE_SET).to_string();
    template.replace(placeholder, &encoded)
}

/// Resolves `href` against the action url without re-encoding `{name}` placeholders.
pub(crate) fn absolute_href(base: &Url, href: &str) -> Result<String, ParseError> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Ok(href.to_string());
    }
    let origin = base.origin();
    if !origin.is_tuple() {
        return Err(ParseError::InvalidHref(href.to_string(), "action url has no origin".into()));
    }
    let origin = origin.ascii_serialization();
    if href.starts_with('/') {
        Ok(format!("{origin}{href}"))
    } else {
        Ok(format!("{origin}/{href}"))
    }
}

impl Component {
    /// Builds the component for one linked action of a descriptor.
    pub fn from_linked(
        parent: &ActionKey,
        id: ComponentId,
        linked: LinkedAction,
    ) -> Result<Self, ParseError> {
        let base = ComponentBase {
            parent: parent.clone(),
            id,
            label: linked.label,
            href: absolute_href(&parent.url, &linked.href)?,
        };

        let mut seen = HashSet::new();
        let mut parameters = linked
            .parameters
            .into_iter()
            .map(|p| {
                if !seen.insert(p.name.clone()) {
                    return Err(ParseError::DuplicateParameter(p.name));
                }
                Parameter::try_from(p)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let component = match parameters.len() {
            0 => Component::Button(ButtonComponent { base, source: None }),
            1 => {
                let parameter = parameters.remove(0);
                if parameter.parameter_type() == ParameterType::Checkbox {
                    Component::MultiValue(MultiValueComponent { base, parameter, value: None })
                } else {
                    Component::SingleValue(SingleValueComponent { base, parameter, value: None })
                }
            }
            _ => Component::Form(FormComponent { base, parameters, values: BTreeMap::new() }),
        };
        Ok(component)
    }

    pub fn base(&self) -> &ComponentBase {
        match self {
            Component::Button(c) => &c.base,
            Component::SingleValue(c) => &c.base,
            Component::MultiValue(c) => &c.base,
            Component::Form(c) => &c.base,
        }
    }

    pub fn id(&self) -> ComponentId {
        self.base().id
    }

    pub fn label(&self) -> &str {
        &self.base().label
    }

    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Button(_) => ComponentKind::Button,
            Component::SingleValue(_) => ComponentKind::SingleValue,
            Component::MultiValue(_) => ComponentKind::MultiValue,
            Component::Form(_) => ComponentKind::Form,
        }
    }

    pub fn parameters(&self) -> Vec<&Parameter> {
        match self {
            Component::Button(_) => vec![],
            Component::SingleValue(c) => vec![&c.parameter],
            Component::MultiValue(c) => vec![&c.parameter],
            Component::Form(c) => c.parameters.iter().collect(),
        }
    }

    /// Href with every set value substituted into its placeholder.
    pub fn href(&self) -> String {
        match self {
            Component::Button(c) => c.base.href.clone(),
            Component::SingleValue(c) => match c.value.as_ref() {
                Some(value) => substitute(
                    &c.base.href,
                    &c.parameter.placeholder(),
                    &ParameterValue::Text(value.clone()),
                ),
                None => c.base.href.clone(),
            },
            Component::MultiValue(c) => match c.value.as_ref() {
                Some(values) => substitute(
                    &c.base.href,
                    &c.parameter.placeholder(),
                    &ParameterValue::List(values.clone()),
                ),
                None => c.base.href.clone(),
            },
            Component::Form(c) => c
                .values
                .iter()
                .fold(c.base.href.clone(), |href, (name, value)| {
                    substitute(&href, &format!("{{{name}}}"), value)
                }),
        }
    }

    /// JSON body for the POST. Buttons never carry `data`.
    pub fn build_body(&self, account: &str) -> ActionPostRequest {
        let data = match self {
            Component::Button(_) => None,
            Component::SingleValue(c) => {
                let embedded = c
                    .base
                    .href
                    .contains(&c.parameter.placeholder());
                c.value
                    .as_ref()
                    .filter(|_| !embedded)
                    .map(|value| {
                        BTreeMap::from([(
                            c.parameter.name.clone(),
                            ParameterValue::Text(value.clone()),
                        )])
                    })
            }
            Component::MultiValue(c) => c.value.as_ref().map(|values| {
                BTreeMap::from([(c.parameter.name.clone(), ParameterValue::List(values.clone()))])
            }),
            Component::Form(c) => Some(c.values.clone()).filter(|values| !values.is_empty()),
        };
        ActionPostRequest { account: account.to_string(), data }
    }

    /// Applies pending values. Values of the wrong shape for the variant are ignored.
    pub fn apply_values(&mut self, values: ComponentValues) -> Result<(), ValidationError> {
        match (self, values) {
            (Component::SingleValue(c), ComponentValues::Single(value)) => c.set_value(value),
            (Component::MultiValue(c), ComponentValues::Multi(values)) => c.set_value(values),
            (Component::MultiValue(c), ComponentValues::Single(value)) => c.set_value(vec![value]),
            (Component::Form(c), ComponentValues::Form(values)) => {
                for (name, value) in values {
                    c.set_value(&name, value)?;
                }
            }
            (component, values) => {
                debug!(id = %component.id(), ?values, "Ignoring values not matching component");
            }
        }
        Ok(())
    }

    /// Validates the currently set values against every parameter.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Component::Button(_) => Ok(()),
            Component::SingleValue(c) => c.parameter.validate(
                c.value
                    .clone()
                    .map(ParameterValue::Text)
                    .as_ref(),
            ),
            Component::MultiValue(c) => c.parameter.validate(
                c.value
                    .clone()
                    .map(ParameterValue::List)
                    .as_ref(),
            ),
            Component::Form(c) => c
                .parameters
                .iter()
                .try_for_each(|p| p.validate(c.values.get(&p.name))),
        }
    }

    /// Detached button executing this component. Buttons return a copy of themselves.
    pub fn to_button(&self) -> ButtonComponent {
        match self {
            Component::Button(c) => c.clone(),
            other => ButtonComponent {
                base: ComponentBase { href: other.href(), ..other.base().clone() },
                source: Some(other.id()),
            },
        }
    }

    /// POSTs the body for `account` to the component href. No retries at this layer.
    #[instrument(skip(self, client), fields(id = %self.id()))]
    pub async fn post(
        &self,
        client: &dyn ActionClient,
        account: &str,
    ) -> Result<ActionPostResponse, ClientError> {
        let body = self.build_body(account);
        client
            .post_action(&self.href(), &body)
            .await
    }
}

impl SingleValueComponent {
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn set_value(&mut self, value: String) {
        self.value = Some(value);
    }
}

impl MultiValueComponent {
    pub fn value(&self) -> Option<&[String]> {
        self.value.as_deref()
    }

    pub fn set_value(&mut self, values: Vec<String>) {
        self.value = Some(values);
    }
}

impl FormComponent {
    pub fn values(&self) -> &BTreeMap<String, ParameterValue> {
        &self.values
    }

    pub fn set_value(&mut self, name: &str, value: ParameterValue) -> Result<(), ValidationError> {
        if !self
            .parameters
            .iter()
            .any(|p| p.name == name)
        {
            return Err(ValidationError::UnknownParameter(name.to_string()));
        }
        self.values
            .insert(name.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::{eq, function};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::{
        dto::{ParameterOption, WireParameter},
        traits::MockActionClient,
    };

    fn key() -> ActionKey {
        ActionKey::new(Url::parse("https://dial.example/api/donate?x=1").unwrap())
    }

    fn param(name: &str, kind: ParameterType) -> WireParameter {
        let options = matches!(kind, ParameterType::Checkbox | ParameterType::Select).then(|| {
            vec![
                ParameterOption { label: "A".into(), value: "a".into(), selected: false },
                ParameterOption { label: "B".into(), value: "b".into(), selected: false },
            ]
        });
        WireParameter {
            name: name.to_string(),
            label: None,
            kind,
            required: false,
            min: None,
            max: None,
            pattern: None,
            pattern_description: None,
            options,
        }
    }

    fn linked(href: &str, parameters: Vec<WireParameter>) -> LinkedAction {
        LinkedAction { href: href.to_string(), label: "Go".to_string(), parameters }
    }

    #[rstest]
    #[case::button(vec![], ComponentKind::Button)]
    #[case::single(vec![param("amount", ParameterType::Number)], ComponentKind::SingleValue)]
    #[case::select(vec![param("pick", ParameterType::Select)], ComponentKind::SingleValue)]
    #[case::multi(vec![param("pick", ParameterType::Checkbox)], ComponentKind::MultiValue)]
    #[case::form(
        vec![param("a", ParameterType::Text), param("b", ParameterType::Checkbox)],
        ComponentKind::Form
    )]
    fn test_component_kind_from_parameters(
        #[case] parameters: Vec<WireParameter>,
        #[case] expected: ComponentKind,
    ) {
        let component = Component::from_linked(&key(), ComponentId(0), linked("/go", parameters))
            .expect("component");

        assert_eq!(component.kind(), expected);
    }

    #[test]
    fn test_duplicate_parameter_rejected() {
        let err = Component::from_linked(
            &key(),
            ComponentId(0),
            linked("/go", vec![param("a", ParameterType::Text), param("a", ParameterType::Text)]),
        )
        .unwrap_err();

        assert_eq!(err, ParseError::DuplicateParameter("a".to_string()));
    }

    #[rstest]
    #[case("/api/buy/{amount}", "https://dial.example/api/buy/{amount}")]
    #[case("api/buy", "https://dial.example/api/buy")]
    #[case("https://other.example/buy?a={amount}", "https://other.example/buy?a={amount}")]
    fn test_relative_href_keeps_placeholders(#[case] href: &str, #[case] expected: &str) {
        let component = Component::from_linked(&key(), ComponentId(0), linked(href, vec![]))
            .expect("component");

        assert_eq!(component.href(), expected);
    }

    #[test]
    fn test_single_value_href_substitution() {
        let mut component = Component::from_linked(
            &key(),
            ComponentId(1),
            linked("/api/buy/{amount}", vec![param("amount", ParameterType::Text)]),
        )
        .unwrap();

        assert_eq!(component.href(), "https://dial.example/api/buy/{amount}");

        component
            .apply_values(ComponentValues::Single("  1/2 sol ".to_string()))
            .unwrap();

        assert_eq!(component.href(), "https://dial.example/api/buy/1%2F2%20sol");
        assert!(!component.href().contains("{amount}"));
        // embedded placeholders belong to the url, not the body
        assert_eq!(component.build_body("acc").data, None);
    }

    #[test]
    fn test_single_value_body() {
        let mut component = Component::from_linked(
            &key(),
            ComponentId(1),
            linked("/api/buy", vec![param("amount", ParameterType::Text)]),
        )
        .unwrap();
        assert_eq!(component.build_body("acc").data, None);

        component
            .apply_values(ComponentValues::Single("5".to_string()))
            .unwrap();

        assert_eq!(
            component.build_body("acc"),
            ActionPostRequest {
                account: "acc".to_string(),
                data: Some(BTreeMap::from([("amount".to_string(), "5".into())])),
            }
        );
    }

    #[test]
    fn test_button_body_never_has_data() {
        let component =
            Component::from_linked(&key(), ComponentId(0), linked("/go", vec![])).unwrap();

        assert_eq!(component.build_body("acc").data, None);
    }

    #[test]
    fn test_multi_value_body_and_href() {
        let mut component = Component::from_linked(
            &key(),
            ComponentId(2),
            linked("/vote?options={pick}", vec![param("pick", ParameterType::Checkbox)]),
        )
        .unwrap();

        component
            .apply_values(ComponentValues::Multi(vec!["a".to_string(), "b".to_string()]))
            .unwrap();

        assert_eq!(component.href(), "https://dial.example/vote?options=a%2Cb");
        assert_eq!(
            component.build_body("acc").data,
            Some(BTreeMap::from([(
                "pick".to_string(),
                ParameterValue::List(vec!["a".to_string(), "b".to_string()])
            )]))
        );
    }

    #[test]
    fn test_form_values() {
        let mut component = Component::from_linked(
            &key(),
            ComponentId(3),
            linked(
                "/mint/{name}",
                vec![param("name", ParameterType::Text), param("b", ParameterType::Checkbox)],
            ),
        )
        .unwrap();

        let err = component
            .apply_values(ComponentValues::Form(BTreeMap::from([(
                "missing".to_string(),
                "x".into(),
            )])))
            .unwrap_err();
        assert_eq!(err, ValidationError::UnknownParameter("missing".to_string()));

        component
            .apply_values(ComponentValues::Form(BTreeMap::from([
                ("name".to_string(), "My Token".into()),
                ("b".to_string(), ParameterValue::List(vec!["a".to_string()])),
            ])))
            .unwrap();

        assert_eq!(component.href(), "https://dial.example/mint/My%20Token");
        let data = component.build_body("acc").data.unwrap();
        assert_eq!(data.len(), 2);
        assert!(component.validate().is_ok());
    }

    #[test]
    fn test_to_button_proxies_to_source() {
        let mut component = Component::from_linked(
            &key(),
            ComponentId(4),
            linked("/buy/{amount}", vec![param("amount", ParameterType::Number)]),
        )
        .unwrap();
        component
            .apply_values(ComponentValues::Single("3".to_string()))
            .unwrap();

        let button = component.to_button();

        assert_eq!(button.source, Some(ComponentId(4)));
        assert_eq!(button.base.label, "Go");
        assert_eq!(button.base.href, "https://dial.example/buy/3");
    }

    #[tokio::test]
    async fn test_post_uses_href_and_body() {
        let mut component = Component::from_linked(
            &key(),
            ComponentId(0),
            linked("/buy/{amount}", vec![param("amount", ParameterType::Number)]),
        )
        .unwrap();
        component
            .apply_values(ComponentValues::Single("2".to_string()))
            .unwrap();

        let mut client = MockActionClient::new();
        client
            .expect_post_action()
            .with(
                function(|href: &str| href == "https://dial.example/buy/2"),
                eq(ActionPostRequest { account: "acc".to_string(), data: None }),
            )
            .times(1)
            .returning(|_, _| {
                Ok(ActionPostResponse { transaction: Some("AQ==".to_string()), ..Default::default() })
            });
        let response = component
            .post(&client, "acc")
            .await
            .expect("post");

        assert_eq!(response.transaction.as_deref(), Some("AQ=="));
    }
}
