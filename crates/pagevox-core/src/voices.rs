//! Built-in voice catalogue for the dialog synthesis model.

use serde::Serialize;

/// A selectable narration voice.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Voice {
    pub id: &'static str,
    pub name: &'static str,
    pub accent: &'static str,
    pub gender: &'static str,
}

const VOICES: &[Voice] = &[
    Voice {
        id: "s3://voice-cloning-zero-shot/baf1ef41-36b6-428c-9bdf-50ba54682bd8/original/manifest.json",
        name: "Angelo",
        accent: "US",
        gender: "male",
    },
    Voice {
        id: "s3://voice-cloning-zero-shot/e040bd1b-f190-4bdb-83f0-75ef85b18f84/original/manifest.json",
        name: "Arsenio",
        accent: "US African American",
        gender: "male",
    },
    Voice {
        id: "s3://voice-cloning-zero-shot/b27bc13e-996f-4841-b584-4d35801aea98/original/manifest.json",
        name: "Deedee",
        accent: "US African American",
        gender: "female",
    },
    Voice {
        id: "s3://voice-cloning-zero-shot/f6c4ed76-1b55-4cd9-8896-31f7535f6cdb/original/manifest.json",
        name: "Jennifer",
        accent: "US",
        gender: "female",
    },
    Voice {
        id: "s3://voice-cloning-zero-shot/34eaa933-62cb-4e32-adb8-c1723ef85097/original/manifest.json",
        name: "Timo",
        accent: "US",
        gender: "male",
    },
    Voice {
        id: "s3://voice-cloning-zero-shot/d712cad5-85db-44c6-8ee0-8f4361ed537b/original/manifest.json",
        name: "Briggs",
        accent: "US Southern",
        gender: "male",
    },
];

/// Voices the API layer offers to clients at upload time.
pub fn available_voices() -> &'static [Voice] {
    VOICES
}
