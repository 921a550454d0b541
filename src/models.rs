use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Entity kinds whose text is kept in the translation service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Product,
    ProductCategory,
    ProductCollection,
    ProductVariant,
    ProductType,
    ProductTag,
    ProductOption,
    ProductOptionValue,
    ShippingOption,
}

impl ModelType {
    pub const ALL: [ModelType; 9] = [
        ModelType::Product,
        ModelType::ProductCategory,
        ModelType::ProductCollection,
        ModelType::ProductVariant,
        ModelType::ProductType,
        ModelType::ProductTag,
        ModelType::ProductOption,
        ModelType::ProductOptionValue,
        ModelType::ShippingOption,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Product => "product",
            ModelType::ProductCategory => "product_category",
            ModelType::ProductCollection => "product_collection",
            ModelType::ProductVariant => "product_variant",
            ModelType::ProductType => "product_type",
            ModelType::ProductTag => "product_tag",
            ModelType::ProductOption => "product_option",
            ModelType::ProductOptionValue => "product_option_value",
            ModelType::ShippingOption => "shipping_option",
        }
    }

    /// Properties translated when nothing else is configured
    pub fn default_properties(&self) -> &'static [&'static str] {
        match self {
            ModelType::Product => &["title", "subtitle", "description"],
            ModelType::ProductCategory => &["name", "description"],
            ModelType::ProductCollection => &["title"],
            ModelType::ProductVariant => &["title"],
            ModelType::ProductType => &["value"],
            ModelType::ProductTag => &["value"],
            ModelType::ProductOption => &["title"],
            ModelType::ProductOptionValue => &["value"],
            ModelType::ShippingOption => &["name"],
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelType::ALL
            .into_iter()
            .find(|model_type| model_type.as_str() == s)
            .ok_or_else(|| format!("Unknown model type: '{}'", s))
    }
}

/// Which properties of a model type are translatable, and how its keys are tagged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelKeys {
    pub properties: Vec<String>,
    pub tags: Vec<String>,
}

impl ModelKeys {
    pub fn defaults_for(model_type: ModelType) -> Self {
        Self {
            properties: model_type
                .default_properties()
                .iter()
                .map(|p| p.to_string())
                .collect(),
            tags: vec![model_type.as_str().to_string()],
        }
    }
}

/// Per-type key mapping, with every type present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelKeyMap(HashMap<ModelType, ModelKeys>);

impl Default for ModelKeyMap {
    fn default() -> Self {
        Self(
            ModelType::ALL
                .into_iter()
                .map(|model_type| (model_type, ModelKeys::defaults_for(model_type)))
                .collect(),
        )
    }
}

impl ModelKeyMap {
    pub fn get(&self, model_type: ModelType) -> ModelKeys {
        self.0
            .get(&model_type)
            .cloned()
            .unwrap_or_else(|| ModelKeys::defaults_for(model_type))
    }

    pub fn set(&mut self, model_type: ModelType, keys: ModelKeys) {
        self.0.insert(model_type, keys);
    }
}

/// An entity as handed over by its owner: an id plus arbitrary properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ModelRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Text of a property; missing and null properties read as ""
    pub fn text(&self, property: &str) -> String {
        match self.fields.get(property) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// A language configured in the translation project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub label: String,
    pub tag: String,
    #[serde(default)]
    pub base: bool,
}

/// Language shown to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableLanguage {
    pub label: String,
    pub tag: String,
}

/// What admin and storefront callers need to talk to the translation project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationOptions {
    pub default_language: String,
    pub available_languages: Vec<AvailableLanguage>,
    pub api_key: String,
    pub api_url: String,
}

impl TranslationOptions {
    /// Returned when the project reports no languages at all
    pub fn fallback() -> Self {
        Self {
            default_language: "en".to_string(),
            available_languages: Vec::new(),
            api_key: String::new(),
            api_url: String::new(),
        }
    }

    /// Default = first base language, else the first listed
    pub fn from_languages(languages: &[Language], api_key: &str, api_url: &str) -> Self {
        let Some(first) = languages.first() else {
            return Self::fallback();
        };
        let default_language = languages
            .iter()
            .find(|lang| lang.base)
            .unwrap_or(first)
            .tag
            .clone();

        Self {
            default_language,
            available_languages: languages
                .iter()
                .map(|lang| AvailableLanguage {
                    label: lang.label.clone(),
                    tag: lang.tag.clone(),
                })
                .collect(),
            api_key: api_key.to_string(),
            api_url: api_url.to_string(),
        }
    }
}

/// One key submitted to the bulk import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyImport {
    pub name: String,
    pub namespace: String,
    pub tags: Vec<String>,
    pub translations: BTreeMap<String, String>,
}

/// Optional narrowing of a translation listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ListContext {
    pub country_code: Option<String>,
}

/// Translations of one namespace, as served to callers:
/// `{"id": "...", "<locale>": {"<key>": "<text>"}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceTranslations {
    pub id: String,
    #[serde(flatten)]
    pub translations: BTreeMap<String, BTreeMap<String, String>>,
}

/// Shape of a `/translations` response for one namespace.
///
/// The service either nests each locale's entries under the namespace id or
/// returns them flat; the shape is decided here, once.
#[derive(Debug, Clone, PartialEq)]
pub enum TranslationPayload {
    Nested {
        by_namespace: BTreeMap<String, Map<String, Value>>,
    },
    Flat {
        fields: BTreeMap<String, Map<String, Value>>,
    },
}

impl TranslationPayload {
    /// Classify a response body; `None` when it holds no locale objects
    pub fn from_response(namespace: &str, body: Value) -> Option<Self> {
        let Value::Object(locales) = body else {
            return None;
        };

        let mut by_locale = BTreeMap::new();
        for (locale, entries) in locales {
            if let Value::Object(entries) = entries {
                by_locale.insert(locale, entries);
            }
        }
        if by_locale.is_empty() {
            return None;
        }

        let nested = by_locale
            .values()
            .any(|entries| matches!(entries.get(namespace), Some(Value::Object(_))));

        Some(if nested {
            TranslationPayload::Nested {
                by_namespace: by_locale,
            }
        } else {
            TranslationPayload::Flat { fields: by_locale }
        })
    }

    /// Flatten to locale → key → text, dropping empty locales.
    /// `None` when nothing is left.
    pub fn into_translations(self, namespace: &str) -> Option<NamespaceTranslations> {
        let by_locale = match self {
            TranslationPayload::Nested { by_namespace } => by_namespace
                .into_iter()
                .map(|(locale, mut entries)| {
                    let inner = match entries.remove(namespace) {
                        Some(Value::Object(inner)) => inner,
                        _ => Map::new(),
                    };
                    (locale, inner)
                })
                .collect::<BTreeMap<_, _>>(),
            TranslationPayload::Flat { fields } => fields,
        };

        let translations: BTreeMap<String, BTreeMap<String, String>> = by_locale
            .into_iter()
            .map(|(locale, entries)| {
                let texts = entries
                    .into_iter()
                    .filter_map(|(key, value)| match value {
                        Value::Null => None,
                        Value::String(text) => Some((key, text)),
                        other => Some((key, other.to_string())),
                    })
                    .collect::<BTreeMap<_, _>>();
                (locale, texts)
            })
            .filter(|(_, texts)| !texts.is_empty())
            .collect();

        if translations.is_empty() {
            return None;
        }
        Some(NamespaceTranslations {
            id: namespace.to_string(),
            translations,
        })
    }
}

/// Result of submitting model translations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Keys were imported for these model ids
    Synced(Vec<String>),
    /// No translatable properties; nothing was sent
    NothingToSync,
    /// The service rejected the import, or it could not be sent.
    /// Existing keys are reported the same way.
    Rejected { ids: Vec<String>, error: String },
}

impl SyncOutcome {
    /// Ids whose translations are now in the service
    pub fn ids(&self) -> &[String] {
        match self {
            SyncOutcome::Synced(ids) => ids,
            SyncOutcome::NothingToSync | SyncOutcome::Rejected { .. } => &[],
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, SyncOutcome::Rejected { .. })
    }
}
