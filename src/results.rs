//! Results document model
//!
//! Serde model of the JSON document published for every division node.
//! Decoding is best-effort: every field falls back to its default when it is
//! missing. Percentages are kept as text: numeric strings verbatim, JSON
//! numbers in their shortest rendering.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One harvested results document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsDocument {
    pub historic: Vec<HistoricResult>,
    pub progress: ProgressInfo,
    pub results: ResultSummary,
}

impl ResultsDocument {
    pub fn from_slice(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    /// Progress timestamp in Unix seconds (published in milliseconds)
    pub fn timestamp_secs(&self) -> i64 {
        self.progress.timestamp.div_euclid(1000)
    }
}

/// Counting progress of the node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressInfo {
    pub processed: i64,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResultSummary {
    #[serde(deserialize_with = "number_text")]
    pub abst_percent: Option<String>,
    pub abstention: i64,
    pub blank: i64,
    pub census: i64,
    pub counted_census: i64,
    #[serde(deserialize_with = "number_text")]
    pub counted_percent: Option<String>,
    pub null: i64,
    pub parties: Vec<PartyResult>,
    pub voters: i64,
}

impl ResultSummary {
    pub fn party(&self, acronym: &str) -> Option<&PartyResult> {
        self.parties.iter().find(|p| p.acronym == acronym)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyResult {
    pub acronym: String,
    pub code: String,
    pub color: String,
    pub id: String,
    pub members: Vec<String>,
    pub name: String,
    pub ord: i64,
    pub seats: i64,
    pub votes: Votes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Votes {
    #[serde(deserialize_with = "number_text")]
    pub percent: Option<String>,
    pub presential: i64,
}

/// Result of a previous election, as embedded in the current document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoricResult {
    pub year: i64,
    #[serde(flatten)]
    pub result: ResultSummary,
}

/// Render an optional percentage the way it was published, empty when absent
pub fn number_cell(number: &Option<String>) -> String {
    number.clone().unwrap_or_default()
}

/// Accept a JSON number, a numeric string or null
fn number_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(_) => Ok(Some(s.trim().to_string())),
            Err(_) => Err(serde::de::Error::custom(format!(
                "invalid number text '{}'",
                s
            ))),
        },
        Value::Null => Ok(None),
        other => Err(serde::de::Error::custom(format!(
            "expected a number, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "historic": [
            {"year": 2015, "census": 100, "voters": 70, "abstPercent": 30.00, "parties": []}
        ],
        "progress": {"processed": 50, "timestamp": 1556483400123, "total": 100},
        "results": {
            "abstPercent": 25.50,
            "abstention": 25,
            "blank": 1,
            "census": 100,
            "countedCensus": 100,
            "countedPercent": "100.00",
            "null": 2,
            "voters": 75,
            "parties": [
                {"acronym": "A", "seats": 2, "votes": {"percent": 60.25, "presential": 43}},
                {"acronym": "B", "seats": 1, "members": ["Ana"], "votes": {"percent": 39.75, "presential": 29}}
            ]
        }
    }"#;

    #[test]
    fn test_decode_document() {
        let doc = ResultsDocument::from_slice(DOCUMENT.as_bytes()).unwrap();

        assert_eq!(doc.progress.processed, 50);
        assert_eq!(doc.timestamp_secs(), 1_556_483_400);
        assert_eq!(doc.results.census, 100);
        assert_eq!(number_cell(&doc.results.abst_percent), "25.5");
        assert_eq!(number_cell(&doc.results.counted_percent), "100.00");
        assert_eq!(doc.results.parties.len(), 2);

        let b = doc.results.party("B").unwrap();
        assert_eq!(b.seats, 1);
        assert_eq!(b.members, vec!["Ana".to_string()]);
        assert_eq!(number_cell(&b.votes.percent), "39.75");
        assert!(doc.results.party("C").is_none());

        assert_eq!(doc.historic[0].year, 2015);
        assert_eq!(doc.historic[0].result.voters, 70);
    }

    #[test]
    fn test_missing_fields_default() {
        let doc = ResultsDocument::from_slice(br#"{"results": {"parties": [{"acronym": "A"}]}}"#)
            .unwrap();

        assert!(doc.historic.is_empty());
        assert_eq!(doc.progress, ProgressInfo::default());
        assert_eq!(doc.results.parties[0].votes.presential, 0);
        assert_eq!(number_cell(&doc.results.parties[0].votes.percent), "");
    }

    #[test]
    fn test_rejects_non_documents() {
        assert!(ResultsDocument::from_slice(b"<html>").is_err());
        assert!(ResultsDocument::from_slice(br#"{"results": {"countedPercent": "n/a"}}"#).is_err());
    }
}
