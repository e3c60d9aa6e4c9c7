//! Signature - リクエストの正規化ハッシュ（キャッシュキー）
//!
//! # アルゴリズム
//! 1. 固定キーリストの順に値を取り出す（リストにないキーは無視）
//! 2. 複数値はソートする（順序の違いを吸収）
//! 3. `{key: value}` を BTreeMap に詰めて compact JSON にする
//!    （キー順は BTreeMap が保証、空白の揺れなし）
//! 4. SHA-256 を取り、小文字 hex 64 文字にする
//!
//! 存在しないキーは `null` として含めます。
//! 「キーが無い」と「空リスト」は別の署名になります。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::params::{ParamValue, RequestParams};

/// Keys that affect what the upstream service produces, in canonical order.
pub const DEFAULT_SIGNATURE_KEYS: &[&str] = &[
    "product_type",
    "variable",
    "pressure_level",
    "year",
    "month",
    "day",
    "time",
    "area",
    "data_format",
];

/// Signature は 256-bit ダイジェストの hex 表現
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 既存の hex 文字列から復元（永続化ファイル読み込み用）
    pub fn from_hex(hex: &str) -> Option<Self> {
        let valid = hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| Self(hex.to_string()))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonicalizer はキーリストを持ち、パラメータから Signature を作る
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    keys: Vec<String>,
}

impl Canonicalizer {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// 署名対象だけを正規化した JSON 値
    pub fn canonical_value(&self, params: &RequestParams) -> serde_json::Value {
        let mut normalized: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
        for key in &self.keys {
            let value = match params.get(key) {
                None => serde_json::Value::Null,
                Some(ParamValue::Scalar(s)) => serde_json::Value::String(s.clone()),
                Some(ParamValue::Multi(values)) => {
                    let mut sorted = values.clone();
                    sorted.sort();
                    serde_json::Value::from(sorted)
                }
            };
            normalized.insert(key.as_str(), value);
        }
        serde_json::Value::Object(
            normalized
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    pub fn sign(&self, params: &RequestParams) -> Signature {
        let canonical = self.canonical_value(params);
        // Value -> bytes は失敗しない（文字列キーのみ）
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        Signature(hex::encode(digest))
    }
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNATURE_KEYS.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn base() -> RequestParams {
        RequestParams::new()
            .with("product_type", vec!["reanalysis"])
            .with("variable", vec!["temperature", "geopotential", "u_wind"])
            .with("pressure_level", vec!["500", "850"])
            .with("year", vec!["2024"])
            .with("month", vec!["01", "02"])
            .with("day", vec!["01"])
            .with("time", vec!["00:00", "12:00"])
            .with("area", vec!["60", "-10", "30", "20"])
            .with("data_format", "netcdf")
    }

    #[test]
    fn signature_is_64_lowercase_hex() {
        let sig = Canonicalizer::default().sign(&base());
        assert_eq!(sig.as_str().len(), 64);
        assert!(Signature::from_hex(sig.as_str()).is_some());
    }

    #[test]
    fn list_order_does_not_change_signature() {
        let shuffled = base()
            .with("variable", vec!["u_wind", "temperature", "geopotential"])
            .with("time", vec!["12:00", "00:00"])
            .with("month", vec!["02", "01"]);

        let c = Canonicalizer::default();
        assert_eq!(c.sign(&base()), c.sign(&shuffled));
    }

    #[rstest]
    #[case::variable("variable", vec!["temperature"])]
    #[case::year("year", vec!["2023"])]
    #[case::pressure("pressure_level", vec!["500"])]
    #[case::area("area", vec!["61", "-10", "30", "20"])]
    fn changing_a_signed_key_changes_signature(#[case] key: &str, #[case] value: Vec<&str>) {
        let c = Canonicalizer::default();
        let changed = base().with(key, value);
        assert_ne!(c.sign(&base()), c.sign(&changed));
    }

    #[test]
    fn unsigned_keys_are_ignored() {
        let c = Canonicalizer::default();
        let noisy = base()
            .with("op_id", "op-123")
            .with("north", "60")
            .with("csrf_token", "abc");
        assert_eq!(c.sign(&base()), c.sign(&noisy));
    }

    #[test]
    fn missing_key_differs_from_empty_list() {
        let c = Canonicalizer::new(["variable"]);
        let missing = RequestParams::new();
        let empty = RequestParams::new().with("variable", Vec::<String>::new());
        assert_ne!(c.sign(&missing), c.sign(&empty));
    }

    #[test]
    fn canonical_value_sorts_lists() {
        let c = Canonicalizer::new(["variable"]);
        let params = RequestParams::new().with("variable", vec!["b", "a"]);
        assert_eq!(
            c.canonical_value(&params),
            serde_json::json!({"variable": ["a", "b"]})
        );
    }
}
