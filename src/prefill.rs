//! Field prefill and draft overrides applied when a form is opened.

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::local_store::{BlobStore, keys};
use crate::record::{FieldBag, FormType};

/// The three editor tabs whose unsaved edits are kept separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormTab {
    General,
    Valuation,
    Market,
}

impl FormTab {
    pub const ALL: [FormTab; 3] = [FormTab::General, FormTab::Valuation, FormTab::Market];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormTab::General => "general",
            FormTab::Valuation => "valuation",
            FormTab::Market => "market",
        }
    }
}

fn as_object(value: Option<Value>) -> Option<FieldBag> {
    match value {
        Some(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Build the field bag shown when a form is opened.
///
/// Layers, later wins: `base` (server record or defaults), then the last
/// submitted form of this type when `is_new`, then each tab's unsaved edits.
/// The merge is shallow; every key is independent.
pub fn open_form<S: BlobStore + ?Sized>(
    store: &S,
    form_type: FormType,
    form_id: &str,
    base: &FieldBag,
    is_new: bool,
) -> Result<FieldBag> {
    let mut fields = base.clone();

    if is_new {
        if let Some(prefill) = as_object(store.get(&keys::last_submitted(form_type))?) {
            debug!("prefilling {} {} with {} fields", form_type, form_id, prefill.len());
            fields.extend(prefill);
        }
    }

    for tab in FormTab::ALL {
        if let Some(overrides) = as_object(store.get(&keys::tab_draft(form_type, tab, form_id))?) {
            fields.extend(overrides);
        }
    }

    Ok(fields)
}

/// Merge unsaved edits into the stored override for one tab.
pub fn save_tab_draft<S: BlobStore + ?Sized>(
    store: &S,
    form_type: FormType,
    tab: FormTab,
    form_id: &str,
    edits: FieldBag,
) -> Result<FieldBag> {
    let key = keys::tab_draft(form_type, tab, form_id);
    let mut draft = as_object(store.get(&key)?).unwrap_or_default();
    draft.extend(edits);
    store.set(&key, &Value::Object(draft.clone()))?;
    Ok(draft)
}

/// Remember a successful submission as the next prefill and drop its tab drafts.
pub fn record_submission<S: BlobStore + ?Sized>(
    store: &S,
    form_type: FormType,
    form_id: &str,
    fields: &FieldBag,
) -> Result<()> {
    store.set(&keys::last_submitted(form_type), &Value::Object(fields.clone()))?;
    for tab in FormTab::ALL {
        store.remove(&keys::tab_draft(form_type, tab, form_id))?;
    }
    Ok(())
}

pub fn save_user_draft<S: BlobStore + ?Sized>(store: &S, username: &str, draft: &Value) -> Result<()> {
    store.set(&keys::user_draft(username), draft)
}

pub fn load_user_draft<S: BlobStore + ?Sized>(store: &S, username: &str) -> Result<Option<Value>> {
    store.get(&keys::user_draft(username))
}

pub fn clear_user_draft<S: BlobStore + ?Sized>(store: &S, username: &str) -> Result<()> {
    store.remove(&keys::user_draft(username))
}
