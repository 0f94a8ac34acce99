use anyhow::Context;
use axum::{
    extract::{
        multipart::{Field, MultipartError},
        Multipart, State,
    },
    http::HeaderMap,
    Json,
};
use std::num::IntErrorKind;

use tracing::{debug, instrument, warn, Span};
use uuid::Uuid;

use super::{
    parser::parse_captions, CaptionError, CaptionRequest, CaptionResponse, MAX_CAPTIONS,
};
use crate::{
    server::AppState,
    tracing_utils::ExtractTelemetryContext,
    upload::{sniff_mime_type, InlineImage, StagedUpload},
};

const DEFAULT_LANGUAGE: &str = "english";
const DEFAULT_LENGTH: &str = "medium";

/// Handles caption generation requests for one uploaded image.
#[instrument(skip_all)]
pub async fn generate_caption(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<CaptionResponse>, CaptionError> {
    headers.extract_context_span(&Span::current());
    let request_id = Uuid::new_v4().as_simple().to_string();

    let form = CaptionForm::from_multipart(multipart).await?.validate()?;
    debug!(
        %request_id,
        category = %form.category,
        num_captions = form.num_captions,
        language = %form.language,
        length = %form.length,
        "Received caption request"
    );

    let staged =
        StagedUpload::write(state.upload_dir(), &form.image.file_name, &form.image.bytes).await?;
    let bytes = staged.read().await?;
    if let Err(e) = staged.remove().await {
        warn!(%request_id, "{e:#}");
    }

    let mime_type = sniff_mime_type(&bytes, form.image.content_type.as_deref());
    let request = CaptionRequest {
        image: InlineImage::new(mime_type, &bytes),
        category: form.category,
        num_captions: form.num_captions,
        language: form.language,
        length: form.length,
    };
    let prompt = state
        .prompt_template()
        .render(&request)
        .context("failed to render prompt")?;
    debug!(%request_id, mime_type = %request.image.mime_type, %prompt, "Calling generation service");

    let text = state.generator().generate(&prompt, &request.image).await?;
    if text.trim().is_empty() {
        return Err(CaptionError::NoCaptions);
    }

    let mut captions = parse_captions(&text);
    let parsed = captions.len();
    captions.truncate(request.max_records());
    debug!(%request_id, parsed, returned = captions.len(), "Parsed generated captions");

    Ok(Json(CaptionResponse {
        category: request.category,
        language: request.language,
        captions,
    }))
}

#[derive(Debug)]
struct UploadedImage {
    file_name: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// Raw multipart fields. Only the first occurrence of each field is kept.
#[derive(Debug, Default)]
struct CaptionForm {
    image: Option<UploadedImage>,
    category: Option<String>,
    num_captions: Option<String>,
    language: Option<String>,
    length: Option<String>,
}

/// Form after presence checks and normalization.
#[derive(Debug)]
struct ValidatedForm {
    image: UploadedImage,
    category: String,
    num_captions: i64,
    language: String,
    length: String,
}

impl CaptionForm {
    async fn from_multipart(mut multipart: Multipart) -> Result<Self, CaptionError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(form_error)? {
            let name = field.name().map(str::to_string);
            let file_name = field.file_name().map(str::to_string);
            // Parts carrying a filename are files; everything else is a text field.
            match (name.as_deref(), file_name) {
                (Some("image"), Some(file_name)) if form.image.is_none() => {
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await.map_err(form_error)?;
                    form.image = Some(UploadedImage {
                        file_name,
                        content_type,
                        bytes: bytes.to_vec(),
                    });
                }
                (Some("category"), None) if form.category.is_none() => {
                    form.category = Some(read_text(field).await?);
                }
                (Some("num_captions"), None) if form.num_captions.is_none() => {
                    form.num_captions = Some(read_text(field).await?);
                }
                (Some("language"), None) if form.language.is_none() => {
                    form.language = Some(read_text(field).await?);
                }
                (Some("length"), None) if form.length.is_none() => {
                    form.length = Some(read_text(field).await?);
                }
                _ => {}
            }
        }
        Ok(form)
    }

    fn validate(self) -> Result<ValidatedForm, CaptionError> {
        let image = self.image.ok_or(CaptionError::MissingImage)?;
        let category = self.category.ok_or(CaptionError::MissingCategory)?;
        let num_captions = self.num_captions.ok_or(CaptionError::MissingCount)?;
        Ok(ValidatedForm {
            image,
            category: normalize(&category),
            num_captions: parse_count(&num_captions)?,
            language: normalize(self.language.as_deref().unwrap_or(DEFAULT_LANGUAGE)),
            length: normalize(self.length.as_deref().unwrap_or(DEFAULT_LENGTH)),
        })
    }
}

async fn read_text(field: Field<'_>) -> Result<String, CaptionError> {
    field.text().await.map_err(form_error)
}

fn form_error(e: MultipartError) -> CaptionError {
    CaptionError::InvalidForm(e.status(), e.body_text())
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Parses the requested count and clamps it to [`MAX_CAPTIONS`].
/// Zero and negative counts are passed through unchanged; integers beyond
/// the `i64` range saturate.
fn parse_count(raw: &str) -> Result<i64, CaptionError> {
    let raw = raw.trim();
    match raw.parse::<i64>() {
        Ok(n) => Ok(n.min(MAX_CAPTIONS)),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => Ok(MAX_CAPTIONS),
            IntErrorKind::NegOverflow => Ok(i64::MIN),
            _ => Err(CaptionError::InvalidCount(raw.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> UploadedImage {
        UploadedImage {
            file_name: "cat.jpg".into(),
            content_type: Some("image/jpeg".into()),
            bytes: vec![1, 2, 3],
        }
    }

    fn complete_form() -> CaptionForm {
        CaptionForm {
            image: Some(image()),
            category: Some("  Funny ".into()),
            num_captions: Some("3".into()),
            language: None,
            length: None,
        }
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("3").unwrap(), 3);
        assert_eq!(parse_count(" 12 ").unwrap(), 12);
        assert_eq!(parse_count("+7").unwrap(), 7);
        assert_eq!(parse_count("20").unwrap(), 20);
        assert_eq!(parse_count("50").unwrap(), MAX_CAPTIONS);
        assert_eq!(parse_count("0").unwrap(), 0);
        assert_eq!(parse_count("-2").unwrap(), -2);
        assert_eq!(parse_count("100000000000000000000").unwrap(), MAX_CAPTIONS);
        assert_eq!(parse_count(" +99999999999999999999999 ").unwrap(), MAX_CAPTIONS);
        assert_eq!(parse_count("-100000000000000000000").unwrap(), i64::MIN);
        assert!(matches!(
            parse_count("1e30"),
            Err(CaptionError::InvalidCount(raw)) if raw == "1e30"
        ));
        assert!(matches!(
            parse_count("three"),
            Err(CaptionError::InvalidCount(raw)) if raw == "three"
        ));
        assert!(matches!(parse_count(""), Err(CaptionError::InvalidCount(_))));
    }

    #[test]
    fn test_validate_normalizes_and_defaults() {
        let form = complete_form().validate().unwrap();
        assert_eq!(form.category, "funny");
        assert_eq!(form.num_captions, 3);
        assert_eq!(form.language, "english");
        assert_eq!(form.length, "medium");

        let mut raw = complete_form();
        raw.language = Some(" HINDI ".into());
        raw.length = Some("Long".into());
        let form = raw.validate().unwrap();
        assert_eq!(form.language, "hindi");
        assert_eq!(form.length, "long");
    }

    #[test]
    fn test_validate_checks_fields_in_order() {
        let form = CaptionForm::default();
        assert!(matches!(form.validate(), Err(CaptionError::MissingImage)));

        let mut form = CaptionForm::default();
        form.num_captions = Some("3".into());
        form.image = Some(image());
        assert!(matches!(form.validate(), Err(CaptionError::MissingCategory)));

        let mut form = complete_form();
        form.num_captions = None;
        assert!(matches!(form.validate(), Err(CaptionError::MissingCount)));
    }
}
