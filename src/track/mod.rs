//! Track model: static description of bounds, wrap flag, and typed elements
//!
//! The JSON shape matches the editor's file format: elements carry both flat
//! `x`/`y` and a `position` object, and a few element kinds have legacy
//! aliases. Editor-only `select`/`car` elements are stripped on ingest.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::math::Vec2;

/// Minimum pairwise distance between spawn points
pub const MIN_SPAWN_SEPARATION: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Extreme,
}

impl Default for Difficulty {
    fn default() -> Self {
        Self::Medium
    }
}

/// Typed track element kinds, including legacy wire aliases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Road,
    RoadCurve,
    Wall,
    Checkpoint,
    Finish,
    #[serde(alias = "boost_pad")]
    Boost,
    #[serde(alias = "oil_slick")]
    Oil,
    Spawn,
    Ramp,
    RampUp,
    RampDown,
    Bridge,
    Barrier,
    TireStack,
    PitStop,
    // Editor-only kinds, stripped before persistence
    Select,
    Car,
}

impl ElementKind {
    pub fn is_editor_only(&self) -> bool {
        matches!(self, ElementKind::Select | ElementKind::Car)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Wire shape of a track element; flat `x`/`y` win over the `position`
/// object when both are present.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ElementWire {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: ElementKind,
    #[serde(default)]
    x: Option<f64>,
    #[serde(default)]
    y: Option<f64>,
    #[serde(default)]
    position: Option<Position>,
    #[serde(default)]
    width: f64,
    #[serde(default)]
    height: f64,
    #[serde(default)]
    rotation: f64,
    #[serde(default)]
    layer: Option<i8>,
    #[serde(default)]
    checkpoint_index: Option<u32>,
    #[serde(default)]
    properties: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "ElementWire")]
pub struct TrackElement {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub x: f64,
    pub y: f64,
    /// Mirrors `x`/`y`; kept in sync so both shapes are emitted
    pub position: Position,
    pub width: f64,
    pub height: f64,
    /// Radians
    pub rotation: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<i8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
}

impl From<ElementWire> for TrackElement {
    fn from(wire: ElementWire) -> Self {
        let (x, y) = match (wire.x, wire.y, wire.position) {
            (Some(x), Some(y), _) => (x, y),
            (_, _, Some(pos)) => (pos.x, pos.y),
            (x, y, None) => (x.unwrap_or(0.0), y.unwrap_or(0.0)),
        };
        Self {
            id: wire.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            kind: wire.kind,
            x,
            y,
            position: Position { x, y },
            width: wire.width,
            height: wire.height,
            rotation: wire.rotation,
            layer: wire.layer,
            checkpoint_index: wire.checkpoint_index,
            properties: wire.properties,
        }
    }
}

impl TrackElement {
    pub fn new(kind: ElementKind, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            x,
            y,
            position: Position { x, y },
            width,
            height,
            rotation: 0.0,
            layer: None,
            checkpoint_index: None,
            properties: None,
        }
    }

    pub fn with_rotation(mut self, rotation: f64) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_checkpoint_index(mut self, index: u32) -> Self {
        self.checkpoint_index = Some(index);
        self
    }

    /// Center of the element's bounding rectangle
    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Radius of the circumscribed circle, used for proximity detection
    pub fn trigger_radius(&self) -> f64 {
        self.width.max(self.height) / 2.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default = "default_lap_count")]
    pub default_lap_count: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub wrap_around: bool,
    pub elements: Vec<TrackElement>,
    #[serde(default)]
    pub scenery: Vec<TrackElement>,
}

fn default_lap_count() -> u32 {
    3
}

impl Track {
    /// Remove editor-only elements; applied before persistence
    pub fn strip_editor_elements(&mut self) {
        self.elements.retain(|e| !e.kind.is_editor_only());
        self.scenery.retain(|e| !e.kind.is_editor_only());
    }

    pub fn finish(&self) -> Option<&TrackElement> {
        self.elements.iter().find(|e| e.kind == ElementKind::Finish)
    }

    /// Checkpoints sorted by their `checkpointIndex`
    pub fn checkpoints(&self) -> Vec<&TrackElement> {
        let mut cps: Vec<&TrackElement> = self
            .elements
            .iter()
            .filter(|e| e.kind == ElementKind::Checkpoint)
            .collect();
        cps.sort_by_key(|e| e.checkpoint_index.unwrap_or(u32::MAX));
        cps
    }

    pub fn spawns(&self) -> Vec<&TrackElement> {
        self.elements
            .iter()
            .filter(|e| e.kind == ElementKind::Spawn)
            .collect()
    }

    pub fn boost_pads(&self) -> Vec<&TrackElement> {
        self.elements
            .iter()
            .filter(|e| e.kind == ElementKind::Boost)
            .collect()
    }

    /// Validate structural invariants. Returns the full list of violations
    /// so the HTTP surface can report them all at once.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.version < 1 {
            errors.push("version must be >= 1".to_string());
        }
        if self.name.trim().is_empty() {
            errors.push("name must not be empty".to_string());
        }
        if self.width == 0 || self.height == 0 {
            errors.push("width and height must be positive".to_string());
        }
        if self.finish().is_none() {
            errors.push("track must contain a finish element".to_string());
        }

        let spawns = self.spawns();
        if spawns.is_empty() {
            errors.push("track must contain at least one spawn".to_string());
        }
        for i in 0..spawns.len() {
            for j in (i + 1)..spawns.len() {
                if spawns[i].center().distance(spawns[j].center()) < MIN_SPAWN_SEPARATION {
                    errors.push(format!(
                        "spawns {} and {} are closer than {} px",
                        spawns[i].id, spawns[j].id, MIN_SPAWN_SEPARATION
                    ));
                }
            }
        }

        let checkpoints = self.checkpoints();
        for (expected, cp) in checkpoints.iter().enumerate() {
            match cp.checkpoint_index {
                Some(idx) if idx as usize == expected => {}
                Some(idx) => {
                    errors.push(format!(
                        "checkpoint {} has index {}, expected {}",
                        cp.id, idx, expected
                    ));
                }
                None => {
                    errors.push(format!("checkpoint {} is missing checkpointIndex", cp.id));
                }
            }
        }

        errors
    }
}

/// Id of the built-in track; protected from deletion
pub const DEFAULT_TRACK_ID: &str = "default-circuit";

/// Built-in 800x600 circuit used when a room requests a missing track
pub fn default_track() -> Track {
    let mut elements = vec![
        TrackElement::new(ElementKind::Finish, 120.0, 410.0, 120.0, 20.0),
        TrackElement::new(ElementKind::Checkpoint, 120.0, 110.0, 120.0, 20.0).with_checkpoint_index(0),
        TrackElement::new(ElementKind::Checkpoint, 560.0, 110.0, 120.0, 20.0).with_checkpoint_index(1),
        TrackElement::new(ElementKind::Checkpoint, 560.0, 410.0, 120.0, 20.0).with_checkpoint_index(2),
        TrackElement::new(ElementKind::Boost, 360.0, 80.0, 40.0, 40.0),
        TrackElement::new(ElementKind::Road, 80.0, 60.0, 640.0, 480.0),
    ];
    for x in [150.0_f64, 200.0, 250.0, 300.0] {
        elements.push(TrackElement::new(ElementKind::Spawn, x, 460.0, 30.0, 20.0));
    }

    Track {
        id: DEFAULT_TRACK_ID.to_string(),
        version: 1,
        name: "Default Circuit".to_string(),
        author: "slipstream".to_string(),
        created_at: 0,
        updated_at: 0,
        difficulty: Difficulty::Easy,
        default_lap_count: 3,
        width: 800,
        height: 600,
        wrap_around: false,
        elements,
        scenery: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_track() -> Track {
        Track {
            id: "t1".into(),
            version: 1,
            name: "Test".into(),
            author: String::new(),
            created_at: 0,
            updated_at: 0,
            difficulty: Difficulty::Easy,
            default_lap_count: 3,
            width: 800,
            height: 600,
            wrap_around: false,
            elements: vec![
                TrackElement::new(ElementKind::Finish, 100.0, 100.0, 100.0, 20.0),
                TrackElement::new(ElementKind::Spawn, 100.0, 200.0, 30.0, 20.0),
            ],
            scenery: Vec::new(),
        }
    }

    #[test]
    fn default_track_is_valid() {
        assert!(default_track().validate().is_empty());
    }

    #[test]
    fn missing_finish_is_reported() {
        let mut track = minimal_track();
        track.elements.retain(|e| e.kind != ElementKind::Finish);
        let errors = track.validate();
        assert!(errors.iter().any(|e| e.contains("finish")));
    }

    #[test]
    fn checkpoint_gap_is_reported() {
        let mut track = minimal_track();
        track
            .elements
            .push(TrackElement::new(ElementKind::Checkpoint, 0.0, 0.0, 40.0, 40.0).with_checkpoint_index(0));
        track
            .elements
            .push(TrackElement::new(ElementKind::Checkpoint, 50.0, 0.0, 40.0, 40.0).with_checkpoint_index(2));
        let errors = track.validate();
        assert!(errors.iter().any(|e| e.contains("expected 1")));
    }

    #[test]
    fn close_spawns_are_reported() {
        let mut track = minimal_track();
        track
            .elements
            .push(TrackElement::new(ElementKind::Spawn, 110.0, 200.0, 30.0, 20.0));
        let errors = track.validate();
        assert!(errors.iter().any(|e| e.contains("closer")));
    }

    #[test]
    fn element_aliases_parse() {
        let json = r#"{
            "id": "e1", "type": "boost_pad",
            "position": {"x": 10.0, "y": 20.0},
            "width": 40, "height": 40, "rotation": 0
        }"#;
        let element: TrackElement = serde_json::from_str(json).unwrap();
        assert_eq!(element.kind, ElementKind::Boost);
        assert_eq!(element.x, 10.0);
        assert_eq!(element.y, 20.0);

        let json = r#"{"id": "e2", "type": "oil_slick", "x": 5, "y": 6, "width": 1, "height": 1, "rotation": 0}"#;
        let element: TrackElement = serde_json::from_str(json).unwrap();
        assert_eq!(element.kind, ElementKind::Oil);
    }

    #[test]
    fn flat_coordinates_win_over_position_object() {
        let json = r#"{
            "id": "e3", "type": "wall",
            "x": 1.0, "y": 2.0,
            "position": {"x": 99.0, "y": 99.0},
            "width": 10, "height": 10, "rotation": 0
        }"#;
        let element: TrackElement = serde_json::from_str(json).unwrap();
        assert_eq!((element.x, element.y), (1.0, 2.0));
        // serialization keeps both shapes in sync
        let value = serde_json::to_value(&element).unwrap();
        assert_eq!(value["position"]["x"], 1.0);
    }

    #[test]
    fn editor_elements_are_stripped() {
        let mut track = minimal_track();
        track
            .elements
            .push(TrackElement::new(ElementKind::Select, 0.0, 0.0, 1.0, 1.0));
        track
            .elements
            .push(TrackElement::new(ElementKind::Car, 0.0, 0.0, 1.0, 1.0));
        track.strip_editor_elements();
        assert!(track.elements.iter().all(|e| !e.kind.is_editor_only()));
    }
}
