use crate::archivist::record::Record;
use crate::remote::FileDescriptor;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

const PHOTO_FILE_NAME: &str = "photo.jpg";

#[derive(Debug, Deserialize)]
#[serde(tag = "_")]
enum WireMedia {
    #[serde(rename = "TL_messageMediaPhoto")]
    Photo {
        #[serde(rename = "Photo")]
        photo: Option<WirePhoto>,
    },
    #[serde(rename = "TL_messageMediaDocument")]
    Document {
        #[serde(rename = "Document")]
        document: Option<WireDocument>,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "_")]
enum WirePhoto {
    #[serde(rename = "TL_photo")]
    Photo(PhotoBody),
    #[serde(other)]
    Empty,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PhotoBody {
    #[serde(rename = "ID")]
    id: i64,
    access_hash: i64,
    #[serde(default)]
    file_reference: Value,
    #[serde(rename = "DcID")]
    dc_id: i32,
    #[serde(default)]
    sizes: Vec<WirePhotoSize>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "_")]
enum WirePhotoSize {
    #[serde(rename = "TL_photoSize")]
    Sized {
        #[serde(rename = "Type")]
        kind: String,
        #[serde(rename = "Size")]
        size: i64,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "_")]
enum WireDocument {
    #[serde(rename = "TL_document")]
    Document(DocumentBody),
    #[serde(other)]
    Empty,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DocumentBody {
    #[serde(rename = "ID")]
    id: i64,
    access_hash: i64,
    #[serde(default)]
    file_reference: Value,
    #[serde(rename = "DcID")]
    dc_id: i32,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    attributes: Vec<WireDocumentAttribute>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "_")]
enum WireDocumentAttribute {
    #[serde(rename = "TL_documentAttributeFilename")]
    FileName {
        #[serde(rename = "FileName")]
        file_name: String,
    },
    #[serde(other)]
    Other,
}

fn photo_file(record_id: i64, photo: PhotoBody) -> Option<FileDescriptor> {
    // Sizes are usually ascending but not always; pick the largest.
    let best = photo
        .sizes
        .into_iter()
        .filter_map(|size| match size {
            WirePhotoSize::Sized { kind, size } => Some((kind, size)),
            WirePhotoSize::Other => None,
        })
        .max_by_key(|(_, size)| *size);
    let Some((thumb_size, size)) = best else {
        warn!(record_id, "photo has no downloadable size");
        return None;
    };
    Some(FileDescriptor {
        location: json!({
            "_": "TL_inputPhotoFileLocation",
            "ID": photo.id,
            "AccessHash": photo.access_hash,
            "FileReference": photo.file_reference,
            "ThumbSize": thumb_size,
        }),
        dc_id: photo.dc_id,
        size,
        file_name: PHOTO_FILE_NAME.to_string(),
        index: 0,
    })
}

fn document_file(document: DocumentBody) -> FileDescriptor {
    let file_name = document
        .attributes
        .into_iter()
        .find_map(|attr| match attr {
            WireDocumentAttribute::FileName { file_name } => Some(file_name),
            WireDocumentAttribute::Other => None,
        })
        .unwrap_or_default();
    FileDescriptor {
        location: json!({
            "_": "TL_inputDocumentFileLocation",
            "ID": document.id,
            "AccessHash": document.access_hash,
            "FileReference": document.file_reference,
            "ThumbSize": "",
        }),
        dc_id: document.dc_id,
        size: document.size,
        file_name,
        index: 0,
    }
}

/// Downloadable attachments referenced by a message or story record.
pub fn record_media_files(record: &Record) -> Result<Vec<FileDescriptor>> {
    let Some(media) = record.get("Media") else {
        return Ok(Vec::new());
    };
    if media.is_null() {
        return Ok(Vec::new());
    }
    let record_id = record.id().unwrap_or_default();
    let media: WireMedia = serde_json::from_value(media.clone())
        .with_context(|| format!("failed to decode media of record {record_id}"))?;

    let file = match media {
        WireMedia::Photo {
            photo: Some(WirePhoto::Photo(photo)),
        } => photo_file(record_id, photo),
        WireMedia::Photo { .. } => {
            warn!(record_id, "photo media without photo");
            None
        }
        WireMedia::Document {
            document: Some(WireDocument::Document(document)),
        } => Some(document_file(document)),
        WireMedia::Document { .. } | WireMedia::Unsupported => None,
    };
    Ok(file.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).expect("record")
    }

    #[test]
    fn records_without_media_have_no_files() {
        assert!(record_media_files(&record(json!({"ID": 1}))).expect("none").is_empty());
        assert!(
            record_media_files(&record(json!({"ID": 1, "Media": null})))
                .expect("null")
                .is_empty()
        );
        assert!(
            record_media_files(&record(json!({"ID": 1, "Media": {"_": "TL_messageMediaGeo"}})))
                .expect("geo")
                .is_empty()
        );
    }

    #[test]
    fn photo_uses_largest_size() {
        let files = record_media_files(&record(json!({
            "ID": 3,
            "Media": {"_": "TL_messageMediaPhoto", "Photo": {
                "_": "TL_photo", "ID": 11, "AccessHash": 12, "FileReference": "AQI=", "DcID": 4,
                "Sizes": [
                    {"_": "TL_photoSize", "Type": "y", "Size": 900},
                    {"_": "TL_photoStrippedSize", "Type": "i"},
                    {"_": "TL_photoSize", "Type": "m", "Size": 100}
                ]
            }}
        })))
        .expect("photo");

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 900);
        assert_eq!(files[0].dc_id, 4);
        assert_eq!(files[0].file_name, "photo.jpg");
        assert_eq!(files[0].location["ThumbSize"], "y");
        assert_eq!(files[0].location["_"], "TL_inputPhotoFileLocation");
    }

    #[test]
    fn empty_photo_and_sizeless_photo_are_skipped() {
        let empty = record(json!({"ID": 1, "Media": {"_": "TL_messageMediaPhoto", "Photo": {"_": "TL_photoEmpty", "ID": 1}}}));
        assert!(record_media_files(&empty).expect("empty").is_empty());

        let sizeless = record(json!({"ID": 2, "Media": {"_": "TL_messageMediaPhoto", "Photo": {
            "_": "TL_photo", "ID": 1, "AccessHash": 1, "DcID": 1, "Sizes": []
        }}}));
        assert!(record_media_files(&sizeless).expect("sizeless").is_empty());
    }

    #[test]
    fn document_takes_file_name_attribute() {
        let files = record_media_files(&record(json!({
            "ID": 5,
            "Media": {"_": "TL_messageMediaDocument", "Document": {
                "_": "TL_document", "ID": 21, "AccessHash": 22, "DcID": 2, "Size": 2048,
                "Attributes": [
                    {"_": "TL_documentAttributeVideo", "Duration": 3},
                    {"_": "TL_documentAttributeFilename", "FileName": "clip.mp4"}
                ]
            }}
        })))
        .expect("document");

        assert_eq!(files[0].file_name, "clip.mp4");
        assert_eq!(files[0].size, 2048);
        assert_eq!(files[0].location["_"], "TL_inputDocumentFileLocation");
    }

    #[test]
    fn malformed_known_media_is_an_error() {
        let bad = record(json!({"ID": 1, "Media": {"_": "TL_messageMediaDocument", "Document": {"_": "TL_document", "ID": "x"}}}));
        assert!(record_media_files(&bad).is_err());
    }
}
