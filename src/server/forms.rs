//! Multipart form parsing shared by the photo upload routes.

use axum::extract::Multipart;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::detection::JobContext;
use crate::error::{Result, WorkflowError};
use crate::models::Address;

/// A photo upload: the `photo` part plus every other part as text.
#[derive(Debug, Default)]
pub(super) struct PhotoForm {
    pub photo: Option<Vec<u8>>,
    pub fields: HashMap<String, String>,
}

impl PhotoForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut form = PhotoForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| WorkflowError::validation(format!("malformed multipart body: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "photo" {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| WorkflowError::validation(format!("unreadable photo: {}", e)))?;
                form.photo = Some(bytes.to_vec());
            } else if !name.is_empty() {
                let text = field
                    .text()
                    .await
                    .map_err(|e| WorkflowError::validation(format!("unreadable field {}: {}", name, e)))?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    pub fn require_photo(&self) -> Result<&[u8]> {
        match self.photo.as_deref() {
            Some(bytes) if !bytes.is_empty() => Ok(bytes),
            _ => Err(WorkflowError::validation("a non-empty 'photo' part is required")),
        }
    }

    /// Trimmed text of `name`; blank values count as absent.
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    pub fn parsed<T: FromStr>(&self, name: &str) -> Result<Option<T>> {
        match self.text(name) {
            None => Ok(None),
            Some(v) => v
                .parse()
                .map(Some)
                .map_err(|_| WorkflowError::validation(format!("invalid {}: '{}'", name, v))),
        }
    }

    pub fn address(&self) -> Address {
        Address {
            state: self.text("state"),
            city: self.text("city"),
            street: self.text("street"),
            street_number: self.text("street_number"),
            postal_code: self.text("postal_code"),
        }
    }

    /// Context carried alongside a detection upload, if any field was sent.
    pub fn job_context(&self) -> Result<Option<JobContext>> {
        let address = self.address();
        let context = JobContext {
            project_id: self.parsed::<Uuid>("project_id")?,
            latitude: self.parsed::<f64>("latitude")?,
            longitude: self.parsed::<f64>("longitude")?,
            postal_code: address.postal_code,
            state: address.state,
            city: address.city,
            street: address.street,
            street_number: address.street_number,
        };
        if context == JobContext::default() {
            Ok(None)
        } else {
            Ok(Some(context))
        }
    }
}
