use serde::Deserialize;

use crate::error::ImportError;
use crate::schedule::time_window::TimeWindow;
use crate::schedule::types::Preference;

/// Foreign key as the data layer hands it over: a bare id, or the joined row
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum IdRef {
    Text(String),
    Number(i64),
    Row { id: Box<IdRef> },
}

impl IdRef {
    pub fn into_id(self) -> String {
        match self {
            IdRef::Text(id) => id.trim().to_string(),
            IdRef::Number(id) => id.to_string(),
            IdRef::Row { id } => id.into_id(),
        }
    }
}

/// A joined relation arrives either as an object or as an array of them
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    /// At most one element; an empty array means "no relation"
    pub fn into_single(self, field: &str) -> Result<Option<T>, ImportError> {
        match self {
            OneOrMany::One(item) => Ok(Some(item)),
            OneOrMany::Many(mut items) => match items.len() {
                0 => Ok(None),
                1 => Ok(items.pop()),
                n => Err(ImportError::Invalid(format!("{} joins {} rows, expected one", field, n))),
            },
        }
    }
}

/// Preference as posted by the helper form or the data layer
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceSubmission {
    pub id: Option<String>,
    #[serde(alias = "helper_id")]
    pub helper_id: Option<String>,
    pub helper: Option<OneOrMany<IdRef>>,
    #[serde(alias = "task_id")]
    pub task_id: Option<String>,
    pub task: Option<OneOrMany<IdRef>>,
    pub priority: Option<u32>,
    #[serde(default, alias = "is_substitute")]
    pub is_substitute: bool,
    #[serde(alias = "desired_window")]
    pub desired_window: Option<String>,
    #[serde(alias = "free_text")]
    pub free_text: Option<String>,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Merges the flat id column with the joined relation
fn resolve_ref(
    flat: Option<String>,
    joined: Option<OneOrMany<IdRef>>,
    field: &str,
) -> Result<Option<String>, ImportError> {
    let joined = match joined {
        Some(shape) => shape.into_single(field)?.map(IdRef::into_id),
        None => None,
    };
    match (trimmed(flat), trimmed(joined)) {
        (Some(a), Some(b)) if a != b => Err(ImportError::Invalid(format!(
            "{} id {} does not match joined {} {}",
            field, a, field, b
        ))),
        (Some(a), _) => Ok(Some(a)),
        (None, b) => Ok(b),
    }
}

impl TryFrom<PreferenceSubmission> for Preference {
    type Error = ImportError;

    fn try_from(sub: PreferenceSubmission) -> Result<Self, Self::Error> {
        let id = trimmed(sub.id)
            .ok_or_else(|| ImportError::Invalid("preference id is required".to_string()))?;
        let helper_id = resolve_ref(sub.helper_id, sub.helper, "helper")?
            .ok_or_else(|| ImportError::Invalid("helper is required".to_string()))?;
        let task_id = resolve_ref(sub.task_id, sub.task, "task")?;
        let desired_window = trimmed(sub.desired_window);

        if sub.priority == Some(0) {
            return Err(ImportError::Invalid("priority starts at 1".to_string()));
        }
        if !sub.is_substitute {
            if task_id.is_none() {
                return Err(ImportError::Invalid("a regular preference needs a task".to_string()));
            }
            if desired_window.is_some() {
                return Err(ImportError::Invalid(
                    "only substitutes can give a desired window".to_string(),
                ));
            }
        }
        if let Some(raw) = &desired_window {
            TimeWindow::parse(raw).map_err(|e| ImportError::Invalid(e.to_string()))?;
        }

        Ok(Preference {
            id,
            helper_id,
            task_id,
            priority: sub.priority,
            is_substitute: sub.is_substitute,
            desired_window,
            free_text: trimmed(sub.free_text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Preference, ImportError> {
        let sub: PreferenceSubmission = serde_json::from_str(json).unwrap();
        Preference::try_from(sub)
    }

    #[test]
    fn flat_shape() {
        let pref = parse(r#"{"id":"p1","helperId":"anna","taskId":"t1","priority":1}"#).unwrap();
        assert_eq!(pref.helper_id, "anna");
        assert_eq!(pref.task_id.as_deref(), Some("t1"));
        assert_eq!(pref.priority, Some(1));
        assert!(!pref.is_substitute);
    }

    #[test]
    fn joined_object_and_array_shapes() {
        let object = parse(
            r#"{"id":"p1","helper":{"id":"anna","name":"Anna"},"task":{"id":"t1","title":"Bar"}}"#,
        )
        .unwrap();
        let array = parse(r#"{"id":"p1","helper":[{"id":"anna"}],"task":[{"id":"t1"}]}"#).unwrap();
        assert_eq!(object, array);
        assert_eq!(object.task_id.as_deref(), Some("t1"));
    }

    #[test]
    fn numeric_ids_and_snake_case() {
        let pref = parse(r#"{"id":"p1","helper_id":"anna","task":{"id":42},"is_substitute":true}"#).unwrap();
        assert_eq!(pref.task_id.as_deref(), Some("42"));
        assert!(pref.is_substitute);
    }

    #[test]
    fn empty_join_means_no_task() {
        let pref = parse(r#"{"id":"p1","helperId":"anna","task":[],"isSubstitute":true}"#).unwrap();
        assert_eq!(pref.task_id, None);
    }

    #[test]
    fn rejects_ambiguous_or_inconsistent_joins() {
        assert!(parse(r#"{"id":"p1","helperId":"anna","task":[{"id":"t1"},{"id":"t2"}]}"#).is_err());
        assert!(parse(r#"{"id":"p1","helperId":"anna","taskId":"t1","task":{"id":"t2"}}"#).is_err());
    }

    #[test]
    fn regular_preference_rules() {
        assert!(parse(r#"{"id":"p1","helperId":"anna"}"#).is_err());
        assert!(parse(r#"{"id":"p1","helperId":"anna","taskId":"t1","desiredWindow":"morning"}"#).is_err());
        assert!(parse(r#"{"id":"p1","helperId":"anna","taskId":"t1","priority":0}"#).is_err());
    }

    #[test]
    fn substitute_window_is_validated() {
        assert!(parse(r#"{"id":"p1","helperId":"anna","isSubstitute":true,"desiredWindow":"late"}"#).is_err());
        let pref =
            parse(r#"{"id":"p1","helperId":"anna","isSubstitute":true,"desiredWindow":" 09:00 - 12:00 "}"#)
                .unwrap();
        assert_eq!(pref.desired_window.as_deref(), Some("09:00 - 12:00"));
    }
}
