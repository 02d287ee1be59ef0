//! Gesture, reference and frame files
//!
//! Gesture definitions and static references are stored as pretty JSON arrays.
//! Recorded sensor sessions are NDJSON, one [`Frame`] per line.

use std::fs;
use std::path::Path;

use crate::error::GestureError;
use crate::types::{Frame, GestureDefinition, StaticReferencePoint};

/// Parse a JSON array of gesture definitions
pub fn gestures_from_json(json: &str) -> Result<Vec<GestureDefinition>, GestureError> {
    let gestures: Vec<GestureDefinition> = serde_json::from_str(json)?;
    Ok(gestures)
}

pub fn gestures_to_json(gestures: &[GestureDefinition]) -> Result<String, GestureError> {
    Ok(serde_json::to_string_pretty(gestures)?)
}

/// Parse a JSON array of static reference points
pub fn references_from_json(json: &str) -> Result<Vec<StaticReferencePoint>, GestureError> {
    let points: Vec<StaticReferencePoint> = serde_json::from_str(json)?;
    Ok(points)
}

pub fn references_to_json(points: &[StaticReferencePoint]) -> Result<String, GestureError> {
    Ok(serde_json::to_string_pretty(points)?)
}

pub fn load_gestures(path: impl AsRef<Path>) -> Result<Vec<GestureDefinition>, GestureError> {
    gestures_from_json(&fs::read_to_string(path)?)
}

pub fn save_gestures(path: impl AsRef<Path>, gestures: &[GestureDefinition]) -> Result<(), GestureError> {
    fs::write(path, gestures_to_json(gestures)?)?;
    Ok(())
}

pub fn load_references(path: impl AsRef<Path>) -> Result<Vec<StaticReferencePoint>, GestureError> {
    references_from_json(&fs::read_to_string(path)?)
}

pub fn save_references(
    path: impl AsRef<Path>,
    points: &[StaticReferencePoint],
) -> Result<(), GestureError> {
    fs::write(path, references_to_json(points)?)?;
    Ok(())
}

/// Parse one NDJSON frame line, reporting the 1-based line number on failure
pub fn parse_frame_line(line_num: usize, line: &str) -> Result<Option<Frame>, GestureError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<Frame>(trimmed)
        .map(Some)
        .map_err(|e| GestureError::ParseError(format!("Failed to parse line {}: {}", line_num, e)))
}

/// Parse NDJSON (newline-delimited JSON) containing frames
pub fn parse_frames_ndjson(ndjson: &str) -> Result<Vec<Frame>, GestureError> {
    let mut frames = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        if let Some(frame) = parse_frame_line(line_num + 1, line)? {
            frames.push(frame);
        }
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Condition, JointId, Relation, Step};
    use glam::Vec3;
    use pretty_assertions::assert_eq;

    fn sample_gestures() -> Vec<GestureDefinition> {
        vec![
            GestureDefinition::new("Wave").with_step(Step {
                success_conditions: vec![Condition::new(
                    JointId::HandRight,
                    Relation::Above,
                    "ShoulderRight",
                    0,
                )],
                failure_conditions: vec![],
            }),
            GestureDefinition::new("Punch")
                .with_timeout_ms(1500)
                .with_step(Step {
                    success_conditions: vec![Condition::new(
                        JointId::HandRight,
                        Relation::XChange,
                        "HandRight",
                        -50,
                    )],
                    failure_conditions: vec![Condition::new(
                        JointId::HandRight,
                        Relation::Distance,
                        "Head",
                        -900,
                    )],
                })
                .with_step(Step {
                    success_conditions: vec![Condition::new(
                        JointId::HandRight,
                        Relation::XChange,
                        "HandRight",
                        80,
                    )],
                    failure_conditions: vec![Condition::new(
                        JointId::HandRight,
                        Relation::Below,
                        "HipCenter",
                        0,
                    )],
                }),
            GestureDefinition::new("Reach").with_step(Step {
                success_conditions: vec![
                    Condition::new(JointId::HandLeft, Relation::Above, "Target", 0),
                    Condition::new(JointId::HandLeft, Relation::InfrontOf, "Door", 0),
                ],
                failure_conditions: vec![],
            }),
        ]
    }

    #[test]
    fn test_gestures_and_references_round_trip() {
        let gestures = sample_gestures();
        let points = vec![
            StaticReferencePoint::new("Target", Vec3::new(0.0, 1000.0, 0.0)),
            StaticReferencePoint::new("Door", Vec3::new(-1500.0, 0.0, 3200.5)),
        ];

        let loaded = gestures_from_json(&gestures_to_json(&gestures).unwrap()).unwrap();
        assert_eq!(loaded, gestures);

        let loaded = references_from_json(&references_to_json(&points).unwrap()).unwrap();
        assert_eq!(loaded, points);
    }

    #[test]
    fn test_gesture_file_shape() {
        let json = gestures_to_json(&sample_gestures()[..1]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value[0]["name"], "Wave");
        assert_eq!(value[0]["timeoutMs"], 5000);
        assert_eq!(
            value[0]["steps"][0]["successConditions"][0]["relativeId"],
            "ShoulderRight"
        );
        assert!(value[0]["steps"][0]["failureConditions"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_files_on_disk() {
        let dir = std::env::temp_dir().join(format!("gestures-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let gestures_path = dir.join("gestures.json");
        let references_path = dir.join("references.json");

        save_gestures(&gestures_path, &sample_gestures()).unwrap();
        save_references(&references_path, &[StaticReferencePoint::new("Target", Vec3::Y)]).unwrap();

        assert_eq!(load_gestures(&gestures_path).unwrap(), sample_gestures());
        assert_eq!(load_references(&references_path).unwrap().len(), 1);
        assert!(matches!(
            load_gestures(dir.join("missing.json")),
            Err(GestureError::IoError(_))
        ));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_malformed_json_is_reported() {
        assert!(matches!(
            gestures_from_json("{\"name\": \"Wave\"}"),
            Err(GestureError::JsonError(_))
        ));
        assert!(references_from_json("[{\"id\": \"Target\"}]").is_err());
    }

    #[test]
    fn test_parse_frames_ndjson() {
        let ndjson = r#"{"skeletons": [{"trackingId": 1, "joints": {"Head": {"x": 0.0, "y": 1.6, "z": 2.0}}}]}

{"skeletons": []}
"#;
        let frames = parse_frames_ndjson(ndjson).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].skeletons[0].tracking_id, 1);

        let err = parse_frames_ndjson("{\"skeletons\": []}\nnot json").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
