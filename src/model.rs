use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    pub username: String,
    pub email: String,
    pub ratings: Vec<Rating>,
}

/// A rating embedded in its owner's [`User`] record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Rating {
    pub id: u64,
    pub name: String,
    pub url: Option<String>,
    pub rating: u8,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatingInput {
    pub name: String,
    pub url: Option<String>,
    pub rating: i64,
    pub comment: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FlashKind {
    Success,
    Danger,
}

/// One-shot notification shown on the next rendered page.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Flash {
    #[serde(rename = "type")]
    pub kind: FlashKind,
    pub intro: String,
    pub message: String,
}

impl Flash {
    pub fn success(intro: &str, message: &str) -> Self {
        Flash {
            kind: FlashKind::Success,
            intro: intro.to_owned(),
            message: message.to_owned(),
        }
    }

    pub fn danger(intro: &str, message: &str) -> Self {
        Flash {
            kind: FlashKind::Danger,
            intro: intro.to_owned(),
            message: message.to_owned(),
        }
    }

    pub fn failure() -> Self {
        Flash::danger("Error! ", "Something went wrong. Please try again later.")
    }
}
