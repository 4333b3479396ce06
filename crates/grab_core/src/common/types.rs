use enum_map::Enum;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// Gender of the subject, selects which body model file is used
#[derive(Clone, Copy, PartialEq, Eq, Debug, Enum, Display, EnumString, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Neutral = 0,
    Male,
    Female,
}
impl Gender {
    /// Upper case tag used in model file names
    pub fn file_tag(self) -> &'static str {
        match self {
            Gender::Neutral => "NEUTRAL",
            Gender::Male => "MALE",
            Gender::Female => "FEMALE",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Enum, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Handedness {
    Left = 0,
    Right,
}
impl Handedness {
    pub fn file_tag(self) -> &'static str {
        match self {
            Handedness::Left => "LEFT",
            Handedness::Right => "RIGHT",
        }
    }
    /// Prefix of the body joint names of this side
    pub fn joint_prefix(self) -> &'static str {
        match self {
            Handedness::Left => "left_",
            Handedness::Right => "right_",
        }
    }
    /// Prefix of the fingertip vertex names of this side
    pub fn tip_prefix(self) -> &'static str {
        match self {
            Handedness::Left => "l",
            Handedness::Right => "r",
        }
    }
}

/// The actors recorded in every sequence
#[derive(Clone, Copy, PartialEq, Eq, Debug, Enum, Display, EnumIter)]
pub enum Actor {
    #[strum(serialize = "body")]
    Body = 0,
    #[strum(serialize = "lhand")]
    LeftHand,
    #[strum(serialize = "rhand")]
    RightHand,
    #[strum(serialize = "object")]
    Object,
    #[strum(serialize = "table")]
    Table,
}
impl Actor {
    /// Name of the block in the record
    pub fn key(self) -> &'static str {
        match self {
            Actor::Body => "body",
            Actor::LeftHand => "lhand",
            Actor::RightHand => "rhand",
            Actor::Object => "object",
            Actor::Table => "table",
        }
    }
    /// Name of the template mesh reference inside the block
    pub fn template_key(self) -> &'static str {
        match self {
            Actor::Body | Actor::LeftHand | Actor::RightHand => "vtemp",
            Actor::Object => "object_mesh",
            Actor::Table => "table_mesh",
        }
    }
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "body" => Some(Actor::Body),
            "lhand" => Some(Actor::LeftHand),
            "rhand" => Some(Actor::RightHand),
            "object" => Some(Actor::Object),
            "table" => Some(Actor::Table),
            _ => None,
        }
    }
    pub fn hand(handedness: Handedness) -> Self {
        match handedness {
            Handedness::Left => Actor::LeftHand,
            Handedness::Right => Actor::RightHand,
        }
    }
}

/// The classes of deformation model behind the adapter
#[derive(Clone, Copy, PartialEq, Eq, Debug, Enum, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ModelKind {
    Body = 0,
    Hand,
    Object,
}

/// Output products, declared in the order they are produced for a sequence
#[derive(Clone, Copy, PartialEq, Eq, Debug, Enum, Display, EnumString, EnumIter, PartialOrd, Ord)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OutputKind {
    Metadata = 0,
    BodyVerts,
    HandJoints,
    Contact,
    LeftHandVerts,
    RightHandVerts,
    ObjectVerts,
}
impl OutputKind {
    /// Replaces ``.npz`` in the record's file name
    pub fn suffix(self) -> &'static str {
        match self {
            OutputKind::Metadata => "_metadata.npz",
            OutputKind::BodyVerts => "_verts_body.npz",
            OutputKind::HandJoints => "_hand_joints.npz",
            OutputKind::Contact => "_contact_info.npz",
            OutputKind::LeftHandVerts => "_verts_lhand.npz",
            OutputKind::RightHandVerts => "_verts_rhand.npz",
            OutputKind::ObjectVerts => "_verts_object.npz",
        }
    }
    pub fn hand_verts(handedness: Handedness) -> Self {
        match handedness {
            Handedness::Left => OutputKind::LeftHandVerts,
            Handedness::Right => OutputKind::RightHandVerts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn output_kinds_iterate_in_priority_order() {
        let order: Vec<OutputKind> = OutputKind::iter().collect();
        assert_eq!(
            order,
            vec![
                OutputKind::Metadata,
                OutputKind::BodyVerts,
                OutputKind::HandJoints,
                OutputKind::Contact,
                OutputKind::LeftHandVerts,
                OutputKind::RightHandVerts,
                OutputKind::ObjectVerts
            ]
        );
    }

    #[test]
    fn names_parse_case_insensitive() {
        assert_eq!(Gender::from_str("Male").unwrap(), Gender::Male);
        assert_eq!(Gender::from_str("female").unwrap(), Gender::Female);
        assert!(Gender::from_str("other").is_err());
        assert_eq!(OutputKind::from_str("hand_joints").unwrap(), OutputKind::HandJoints);
        assert_eq!(OutputKind::RightHandVerts.to_string(), "right_hand_verts");
        assert_eq!(Gender::Neutral.to_string(), "neutral");
    }

    #[test]
    fn actor_keys_round_trip() {
        for actor in Actor::iter() {
            assert_eq!(Actor::from_key(actor.key()), Some(actor));
            assert_eq!(actor.to_string(), actor.key());
        }
    }
}
