use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use serde_json::Value;
use std::fmt;

/// Flat bag of loosely typed form fields (`pdfDetails`).
pub type FieldBag = serde_json::Map<String, Value>;

/// Discriminator identifying which of the six form schemas a record uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormType {
    BomFlat,
    UbiShop,
    UbiApf,
    SbiFlat,
    SbiLand,
    Industrial,
    #[default]
    #[serde(other)]
    Unknown,
}

impl FormType {
    /// The six list sources, in the order the dashboard fetches them.
    pub const ALL: [FormType; 6] = [
        FormType::BomFlat,
        FormType::UbiShop,
        FormType::UbiApf,
        FormType::SbiFlat,
        FormType::SbiLand,
        FormType::Industrial,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            FormType::BomFlat => "bomflat",
            FormType::UbiShop => "ubishop",
            FormType::UbiApf => "ubiapf",
            FormType::SbiFlat => "sbiflat",
            FormType::SbiLand => "sbiland",
            FormType::Industrial => "industrial",
            FormType::Unknown => "unknown",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        FormType::ALL
            .into_iter()
            .find(|ft| ft.slug().eq_ignore_ascii_case(slug))
    }
}

impl fmt::Display for FormType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    #[default]
    Pending,
    OnProgress,
    Approved,
    Rejected,
    Rework,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::OnProgress => "on-progress",
            Status::Approved => "approved",
            Status::Rejected => "rejected",
            Status::Rework => "rework",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Payment {
    Yes,
    No,
    #[default]
    #[serde(other)]
    Unspecified,
}

impl Payment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Payment::Yes => "yes",
            Payment::No => "no",
            Payment::Unspecified => "",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// One bank-property appraisal submission.
///
/// The form tag arrives as `formType`, `selectedForm`, or both; a known
/// `formType` wins. Records always serialize it as `formType`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(remote = "Self", rename_all = "camelCase")]
pub struct ValuationRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub form_type: FormType,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub bank_name: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub engineer_name: String,
    #[serde(default)]
    pub client_name: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub mobile_number: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub payment: Payment,
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_feedback: Option<String>,
    #[serde(default)]
    pub pdf_details: FieldBag,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
}

impl ValuationRecord {
    pub fn new(unique_id: impl Into<String>, form_type: FormType) -> Self {
        ValuationRecord {
            unique_id: Some(unique_id.into()),
            form_type,
            ..Default::default()
        }
    }

    /// Business key used for deduplication. Blank ids count as missing.
    pub fn key(&self) -> Option<&str> {
        self.unique_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// `lastUpdatedAt`, falling back to `updatedAt`, then `createdAt`.
    pub fn effective_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_updated_at.or(self.updated_at).or(self.created_at)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated_at = Some(now);
    }
}

impl Serialize for ValuationRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ValuationRecord::serialize(self, serializer)
    }
}

impl<'de> Deserialize<'de> for ValuationRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut fields = serde_json::Map::<String, Value>::deserialize(deserializer)?;
        if let Some(selected) = fields.remove("selectedForm") {
            let known = fields
                .get("formType")
                .and_then(|tag| FormType::deserialize(tag).ok())
                .is_some_and(|tag| tag != FormType::Unknown);
            if !known {
                fields.insert("formType".to_string(), selected);
            }
        }
        ValuationRecord::deserialize(Value::Object(fields)).map_err(de::Error::custom)
    }
}

/// Address of a record inside the six form-type collections.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordKey {
    pub form_type: FormType,
    pub unique_id: String,
}

mod lenient {
    use super::*;

    /// Accepts strings, numbers or null.
    pub fn string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(match Option::<Value>::deserialize(deserializer)? {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        })
    }

    /// RFC 3339 strings or epoch milliseconds; anything else is treated as absent.
    pub fn timestamp<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Ok(match Option::<Value>::deserialize(deserializer)? {
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_server_shape() {
        let raw = json!({
            "uniqueId": "VAL-001",
            "selectedForm": "bomflat",
            "status": "on-progress",
            "bankName": "Bank of Maharashtra",
            "city": "Pune",
            "engineerName": "R. Kulkarni",
            "clientName": "A. Shah",
            "mobileNumber": 9876543210u64,
            "payment": "yes",
            "createdAt": "2024-01-05T10:00:00.000Z",
            "lastUpdatedAt": 1704540000000i64,
            "pdfDetails": { "quantity1": "3", "rate1": 1500 },
            "customFields": [{ "name": "Survey No", "value": "12/4" }]
        });

        let record: ValuationRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.key(), Some("VAL-001"));
        assert_eq!(record.form_type, FormType::BomFlat);
        assert_eq!(record.status, Status::OnProgress);
        assert_eq!(record.mobile_number, "9876543210");
        assert_eq!(record.payment, Payment::Yes);
        assert!(record.created_at.is_some());
        assert_eq!(record.effective_timestamp(), record.last_updated_at);
        assert_eq!(record.custom_fields[0].name, "Survey No");
    }

    #[test]
    fn tolerates_missing_and_odd_values() {
        let raw = json!({
            "uniqueId": "  ",
            "formType": "something-new",
            "payment": "",
            "createdAt": "not a date",
            "mobileNumber": null
        });

        let record: ValuationRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.key(), None);
        assert_eq!(record.form_type, FormType::Unknown);
        assert_eq!(record.payment, Payment::Unspecified);
        assert_eq!(record.created_at, None);
        assert_eq!(record.status, Status::Pending);
        assert!(record.mobile_number.is_empty());
    }

    #[test]
    fn both_form_tags_are_accepted() {
        let record: ValuationRecord =
            serde_json::from_str(r#"{"uniqueId":"A","selectedForm":"bomflat","formType":"bomflat"}"#)
                .unwrap();
        assert_eq!(record.form_type, FormType::BomFlat);

        let record: ValuationRecord = serde_json::from_value(json!({
            "uniqueId": "B", "selectedForm": "sbiland", "formType": "legacy"
        }))
        .unwrap();
        assert_eq!(record.form_type, FormType::SbiLand);

        let encoded = serde_json::to_value(&record).unwrap();
        assert_eq!(encoded["formType"], "sbiland");
        assert!(encoded.get("selectedForm").is_none());
    }

    #[test]
    fn effective_timestamp_falls_back() {
        let mut record = ValuationRecord::new("A", FormType::UbiShop);
        assert_eq!(record.effective_timestamp(), None);

        let created = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let updated = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        record.created_at = Some(created);
        assert_eq!(record.effective_timestamp(), Some(created));
        record.updated_at = Some(updated);
        assert_eq!(record.effective_timestamp(), Some(updated));
    }

    #[test]
    fn slugs_round_trip() {
        for ft in FormType::ALL {
            assert_eq!(FormType::from_slug(ft.slug()), Some(ft));
        }
        assert_eq!(FormType::from_slug("BOMFLAT"), Some(FormType::BomFlat));
        assert_eq!(FormType::from_slug("unknown"), None);
    }
}
