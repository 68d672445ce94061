// Label codec for cluster objects
//
// Identity and version metadata travel as labels on the cluster objects. The
// reserved keys come from a constant table handed to the codec; user tags are
// re-keyed under the tag prefix so they can never shadow a reserved key.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::version::VersionSelector;

/// Reserved label keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelKeys {
    /// Slug of the template name
    pub template: &'static str,
    /// Template identity
    pub template_uid: &'static str,
    /// Version number as a decimal string
    pub version: &'static str,
    /// Present (value "true") only on the latest version
    pub version_latest: &'static str,
    /// Prefix for user tags
    pub tag_prefix: &'static str,
}

pub const DEFAULT_LABEL_KEYS: LabelKeys = LabelKeys {
    template: "stencil.dev/workflow-template",
    template_uid: "stencil.dev/workflow-template-uid",
    version: "stencil.dev/version",
    version_latest: "stencil.dev/version-latest",
    tag_prefix: "tags.stencil.dev/",
};

const LATEST_VALUE: &str = "true";

static INVALID_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9-]+").expect("static regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("label {0} is missing")]
    Missing(String),

    #[error("label {key} has non-numeric version {value:?}")]
    InvalidVersion { key: String, value: String },

    #[error("malformed selector requirement {0:?}")]
    InvalidSelector(String),
}

/// Lower-cased name with every run of characters outside `[A-Za-z0-9-]`
/// replaced by a single hyphen, without leading or trailing hyphens.
/// Not reversible.
pub fn slugify(name: &str) -> String {
    INVALID_NAME_CHARS
        .replace_all(name, "-")
        .trim_matches('-')
        .to_lowercase()
}

/// True when `value` is already a slug, so it is safe inside a selector.
pub fn is_slug(value: &str) -> bool {
    !value.is_empty() && slugify(value) == value
}

/// Cluster object name for a template version
pub fn object_name(slug: &str, version: i64) -> String {
    format!("{}-v{}", slug, version)
}

/// Keep only labels whose key starts with `prefix`, with the prefix removed.
pub fn filter_by_prefix(
    labels: &BTreeMap<String, String>,
    prefix: &str,
) -> BTreeMap<String, String> {
    labels
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(prefix)
                .map(|stripped| (stripped.to_string(), value.clone()))
        })
        .collect()
}

/// Equality-conjunction label selector (`k1=v1,k2=v2`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<(String, String)>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.push((key.into(), value.into()));
        self
    }

    pub fn requirements(&self) -> &[(String, String)] {
        &self.requirements
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .requirements
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{}", rendered.join(","))
    }
}

impl FromStr for LabelSelector {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut selector = LabelSelector::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| LabelError::InvalidSelector(part.to_string()))?;
            let key = key.trim().trim_end_matches('=');
            let value = value.trim().trim_start_matches('=');
            if key.is_empty() {
                return Err(LabelError::InvalidSelector(part.to_string()));
            }
            selector = selector.eq(key, value);
        }
        Ok(selector)
    }
}

/// Encodes and decodes template metadata as cluster object labels.
#[derive(Debug, Clone, Copy)]
pub struct LabelCodec {
    keys: LabelKeys,
}

impl Default for LabelCodec {
    fn default() -> Self {
        Self::new(DEFAULT_LABEL_KEYS)
    }
}

impl LabelCodec {
    pub fn new(keys: LabelKeys) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &LabelKeys {
        &self.keys
    }

    /// Full label set for a template version.
    pub fn encode(
        &self,
        uid: &str,
        name: &str,
        version: i64,
        is_latest: bool,
        tags: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(self.keys.template.to_string(), slugify(name));
        labels.insert(self.keys.template_uid.to_string(), uid.to_string());
        labels.insert(self.keys.version.to_string(), version.to_string());
        if is_latest {
            labels.insert(
                self.keys.version_latest.to_string(),
                LATEST_VALUE.to_string(),
            );
        }

        for (key, value) in tags {
            labels.insert(format!("{}{}", self.keys.tag_prefix, key), value.clone());
        }

        labels
    }

    /// User tags carried by a label set.
    pub fn tags(&self, labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        filter_by_prefix(labels, self.keys.tag_prefix)
    }

    pub fn decode_version(&self, labels: &BTreeMap<String, String>) -> Result<i64, LabelError> {
        let raw = labels
            .get(self.keys.version)
            .ok_or_else(|| LabelError::Missing(self.keys.version.to_string()))?;
        raw.parse::<i64>().map_err(|_| LabelError::InvalidVersion {
            key: self.keys.version.to_string(),
            value: raw.clone(),
        })
    }

    pub fn is_latest(&self, labels: &BTreeMap<String, String>) -> bool {
        labels.contains_key(self.keys.version_latest)
    }

    /// Remove the latest marker; returns whether it was present.
    pub fn clear_latest(&self, labels: &mut BTreeMap<String, String>) -> bool {
        labels.remove(self.keys.version_latest).is_some()
    }

    /// Selector matching every version of a template
    pub fn identity_selector(&self, uid: &str) -> LabelSelector {
        LabelSelector::new().eq(self.keys.template_uid, uid)
    }

    /// Selector matching one version; `Latest` matches on the marker,
    /// not on a version number.
    pub fn selector(&self, uid: &str, version: VersionSelector) -> LabelSelector {
        let selector = self.identity_selector(uid);
        match version {
            VersionSelector::Latest => selector.eq(self.keys.version_latest, LATEST_VALUE),
            VersionSelector::Exact(v) => selector.eq(self.keys.version, v.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("t1"), "t1");
        assert_eq!(slugify("MNIST__train!!v2"), "mnist-train-v2");
        assert_eq!(slugify("already-fine"), "already-fine");
        assert_eq!(slugify("!t1"), "t1");
        assert_eq!(slugify("--edge case--"), "edge-case");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_is_slug() {
        assert!(is_slug("t1"));
        assert!(is_slug("mnist-train-v2"));
        assert!(!is_slug(""));
        assert!(!is_slug("T1"));
        assert!(!is_slug("-t1"));
        assert!(!is_slug("t1,stencil.dev/version=1"));
        assert!(!is_slug("a=b"));
    }

    #[test]
    fn test_object_name() {
        assert_eq!(object_name("t1", 1_700_000_000), "t1-v1700000000");
    }

    #[test]
    fn test_encode_latest_marker_only_when_latest() {
        let codec = LabelCodec::default();

        let latest = codec.encode("t1", "T1", 10, true, &BTreeMap::new());
        assert_eq!(latest.get(DEFAULT_LABEL_KEYS.version_latest).unwrap(), "true");
        assert_eq!(latest.get(DEFAULT_LABEL_KEYS.version).unwrap(), "10");
        assert_eq!(latest.get(DEFAULT_LABEL_KEYS.template).unwrap(), "t1");
        assert_eq!(latest.get(DEFAULT_LABEL_KEYS.template_uid).unwrap(), "t1");

        let older = codec.encode("t1", "T1", 9, false, &BTreeMap::new());
        assert!(!older.contains_key(DEFAULT_LABEL_KEYS.version_latest));
        assert!(!codec.is_latest(&older));
    }

    #[test]
    fn test_tags_cannot_shadow_reserved_keys() {
        let codec = LabelCodec::default();
        let user = tags(&[(DEFAULT_LABEL_KEYS.version, "999"), ("team", "ml")]);

        let labels = codec.encode("t1", "t1", 10, true, &user);

        assert_eq!(labels.get(DEFAULT_LABEL_KEYS.version).unwrap(), "10");
        assert_eq!(codec.tags(&labels), user);
    }

    #[test]
    fn test_filter_by_prefix_strips_prefix() {
        let labels = tags(&[
            ("tags.stencil.dev/team", "ml"),
            ("tags.stencil.dev/owner", "ana"),
            ("stencil.dev/version", "10"),
        ]);

        let filtered = filter_by_prefix(&labels, "tags.stencil.dev/");
        assert_eq!(filtered, tags(&[("team", "ml"), ("owner", "ana")]));
        assert!(filter_by_prefix(&labels, "nothing/").is_empty());
    }

    #[test]
    fn test_selector_rendering() {
        let codec = LabelCodec::default();

        assert_eq!(
            codec.selector("t1", VersionSelector::Latest).to_string(),
            "stencil.dev/workflow-template-uid=t1,stencil.dev/version-latest=true"
        );
        assert_eq!(
            codec.selector("t1", VersionSelector::Exact(42)).to_string(),
            "stencil.dev/workflow-template-uid=t1,stencil.dev/version=42"
        );
    }

    #[test]
    fn test_selector_parse_and_match() {
        let selector: LabelSelector = "a=1, b==2".parse().unwrap();
        assert_eq!(selector.requirements().len(), 2);
        assert!(selector.matches(&tags(&[("a", "1"), ("b", "2"), ("c", "3")])));
        assert!(!selector.matches(&tags(&[("a", "1")])));

        assert!("novalue".parse::<LabelSelector>().is_err());
        assert!(LabelSelector::new().matches(&BTreeMap::new()));
    }

    #[test]
    fn test_decode_version() {
        let codec = LabelCodec::default();
        let labels = codec.encode("t1", "t1", 77, false, &BTreeMap::new());
        assert_eq!(codec.decode_version(&labels), Ok(77));

        let bad = tags(&[(DEFAULT_LABEL_KEYS.version, "v77")]);
        assert!(matches!(
            codec.decode_version(&bad),
            Err(LabelError::InvalidVersion { .. })
        ));
        assert!(matches!(
            codec.decode_version(&BTreeMap::new()),
            Err(LabelError::Missing(_))
        ));
    }

    #[test]
    fn test_clear_latest() {
        let codec = LabelCodec::default();
        let mut labels = codec.encode("t1", "t1", 1, true, &BTreeMap::new());
        assert!(codec.clear_latest(&mut labels));
        assert!(!codec.clear_latest(&mut labels));
        assert!(!codec.is_latest(&labels));
    }
}
