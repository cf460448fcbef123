use crate::error::{Error, ErrorKind};
use apod_storage::{Artifact, format_capture_date, parse_capture_date};
use exn::{OptionExt, ResultExt};
use std::path::PathBuf;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArtifactRow {
    pub(crate) capture_date: String,
    pub(crate) logical_name: String,
    pub(crate) size_bytes: i64,
    pub(crate) fingerprint: String,
    pub(crate) stored_path: String,
}
impl TryFrom<&Artifact> for ArtifactRow {
    type Error = Error;
    fn try_from(artifact: &Artifact) -> Result<Self, Self::Error> {
        Ok(Self {
            capture_date: format_capture_date(artifact.capture_date),
            logical_name: artifact.logical_name.clone(),
            size_bytes: i64::try_from(artifact.size_bytes).or_raise(|| ErrorKind::InvalidData("size"))?,
            fingerprint: artifact.fingerprint.clone(),
            // sqlx hates paths.
            stored_path: artifact
                .stored_path
                .to_str()
                .ok_or_raise(|| ErrorKind::InvalidData("stored path"))?
                .to_string(),
        })
    }
}
impl TryFrom<ArtifactRow> for Artifact {
    type Error = Error;
    fn try_from(row: ArtifactRow) -> Result<Self, Self::Error> {
        Ok(Self {
            capture_date: parse_capture_date(&row.capture_date).or_raise(|| ErrorKind::InvalidData("capture date"))?,
            logical_name: row.logical_name,
            size_bytes: u64::try_from(row.size_bytes).or_raise(|| ErrorKind::InvalidData("size"))?,
            fingerprint: row.fingerprint,
            stored_path: PathBuf::from(row.stored_path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apod_storage::fingerprint;

    #[test]
    fn test_row_to_model() {
        let row = ArtifactRow {
            capture_date: "2024-01-01".to_string(),
            logical_name: "cat.jpg".to_string(),
            size_bytes: 3,
            fingerprint: fingerprint(b"abc"),
            stored_path: "/cache/cat.jpg".to_string(),
        };
        let model = Artifact::try_from(row).unwrap();
        assert_eq!(model.size_bytes, 3);
        assert_eq!(model.stored_path, PathBuf::from("/cache/cat.jpg"));
        assert_eq!(format_capture_date(model.capture_date), "2024-01-01");
    }

    #[test]
    fn test_model_to_row() {
        let model = Artifact {
            capture_date: parse_capture_date("2024-01-01").unwrap(),
            logical_name: "cat.jpg".to_string(),
            size_bytes: 3,
            fingerprint: fingerprint(b"abc"),
            stored_path: PathBuf::from("/cache/cat.jpg"),
        };
        let row = ArtifactRow::try_from(&model).unwrap();
        assert_eq!(row.capture_date, "2024-01-01");
        assert_eq!(row.stored_path, "/cache/cat.jpg");
    }

    #[test]
    fn test_corrupt_rows_are_rejected() {
        let row = ArtifactRow {
            capture_date: "last tuesday".to_string(),
            logical_name: "cat.jpg".to_string(),
            size_bytes: 3,
            fingerprint: fingerprint(b"abc"),
            stored_path: "/cache/cat.jpg".to_string(),
        };
        let err = Artifact::try_from(row).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData("capture date")));
        let row = ArtifactRow {
            capture_date: "2024-01-01".to_string(),
            logical_name: "cat.jpg".to_string(),
            size_bytes: -1,
            fingerprint: fingerprint(b"abc"),
            stored_path: "/cache/cat.jpg".to_string(),
        };
        assert!(Artifact::try_from(row).is_err());
    }
}
