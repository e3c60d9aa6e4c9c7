//! RequestParams - 呼び出し側から渡されたリクエストパラメータ
//!
//! 値は単一のスカラーか、順序に意味のない複数値（変数リスト、日付リストなど）です。
//! フィールドごとの検証は、このクレートに届く前に済んでいる前提です。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(String),
    Multi(Vec<String>),
}

impl ParamValue {
    /// Every string carried by this value, in submission order.
    pub fn strings(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            ParamValue::Scalar(s) => std::slice::from_ref(s),
            ParamValue::Multi(values) => values,
        };
        slice.iter().map(String::as_str)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Scalar(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Scalar(value)
    }
}

impl<S: Into<String>> From<Vec<S>> for ParamValue {
    fn from(values: Vec<S>) -> Self {
        ParamValue::Multi(values.into_iter().map(Into::into).collect())
    }
}

/// Named request parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestParams {
    values: BTreeMap<String, ParamValue>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
