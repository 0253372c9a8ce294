//! Request body parsing for the multipart and form endpoints.

use crate::domain::model::{ColOptions, LayerUpdate, NewLayer};
use crate::utils::error::{AppError, Result};
use crate::utils::general::str_to_bool;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use axum::{Form, Json};
use serde_json::json;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Text fields and files of a multipart body.
#[derive(Debug, Default)]
pub struct FormData {
    pub fields: HashMap<String, String>,
    pub files: HashMap<String, UploadedFile>,
}

impl FormData {
    pub async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut form = FormData::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            let filename = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::bad_request(e.body_text()))?;

            if filename.is_some() {
                form.files.insert(
                    name,
                    UploadedFile {
                        filename,
                        content_type,
                        data,
                    },
                );
            } else {
                form.fields
                    .insert(name, String::from_utf8_lossy(&data).into_owned());
            }
        }
        Ok(form)
    }

    /// Non-empty text field.
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// A required, non-empty file. Missing or empty is a bad request.
    pub fn take_file(&mut self, name: &str) -> Result<UploadedFile> {
        let file = self
            .files
            .remove(name)
            .ok_or_else(|| AppError::bad_request(format!("{name} is required")))?;
        if file.data.is_empty() {
            return Err(AppError::bad_request("Uploaded file is empty"));
        }
        Ok(file)
    }

    /// The fields of `POST /layer`. Layers start hidden unless told otherwise.
    pub fn new_layer(&self) -> Result<NewLayer> {
        let name = self
            .text("name")
            .ok_or_else(|| AppError::unprocessable("name is required"))?;
        let col_options = match self.text("col_options") {
            Some(raw) => serde_json::from_str::<ColOptions>(&raw)
                .map_err(|e| AppError::unprocessable(format!("Invalid col_options: {e}")))?,
            None => ColOptions::default(),
        };
        Ok(NewLayer {
            name,
            description: self.text("description"),
            is_hidden: self.text("is_hidden").map_or(true, |v| str_to_bool(&v)),
            color_code: self.text("color_code"),
            symbol: self.text("symbol"),
            col_options,
            original_properties: json!({}),
        })
    }
}

fn layer_update_from_fields(fields: &HashMap<String, String>) -> LayerUpdate {
    let text = |name: &str| {
        fields
            .get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    LayerUpdate {
        name: text("name"),
        description: text("description"),
        is_hidden: text("is_hidden").map(|v| str_to_bool(&v)),
        color_code: text("color_code"),
        symbol: text("symbol"),
    }
}

/// `PATCH /layer/{id}` body: JSON, multipart or urlencoded.
#[derive(Debug)]
pub struct LayerUpdatePayload(pub LayerUpdate);

#[async_trait]
impl<S> FromRequest<S> for LayerUpdatePayload
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            let Json(update) = Json::<LayerUpdate>::from_request(req, state)
                .await
                .map_err(|e| AppError::unprocessable(e.body_text()))?;
            Ok(Self(update))
        } else if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| AppError::bad_request(e.body_text()))?;
            let form = FormData::read(multipart).await?;
            Ok(Self(layer_update_from_fields(&form.fields)))
        } else {
            let Form(fields) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| AppError::unprocessable(e.body_text()))?;
            Ok(Self(layer_update_from_fields(&fields)))
        }
    }
}
