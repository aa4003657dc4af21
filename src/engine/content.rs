// Question and typing-word pools used by the interludes.

use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;

use crate::normalize::normalize;

pub const QUESTIONS_FILE: &str = "questions.json";
pub const TYPING_WORDS_FILE: &str = "typing_words.json";

/// One trivia question with its acceptable answers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Question {
    #[serde(alias = "q")]
    pub prompt: String,
    pub answers: Vec<String>,
}

impl Question {
    pub fn new(prompt: &str, answers: &[&str]) -> Self {
        Self {
            prompt: prompt.to_string(),
            answers: answers.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Whether `text` matches one of the answers after normalization.
    pub fn accepts(&self, text: &str) -> bool {
        let given = normalize(text);
        !given.is_empty() && self.answers.iter().any(|a| normalize(a) == given)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("failed to read {file}: {source}")]
    Io {
        file: String,
        source: std::io::Error,
    },
    #[error("failed to parse {file}: {source}")]
    Parse {
        file: String,
        source: serde_json::Error,
    },
    #[error("{0} pool is empty")]
    Empty(&'static str),
}

#[derive(Debug, Clone)]
pub struct ContentPool {
    questions: Vec<Question>,
    typing_words: Vec<String>,
}

impl ContentPool {
    pub fn new(questions: Vec<Question>, typing_words: Vec<String>) -> Result<Self, ContentError> {
        if questions.iter().all(|q| q.answers.is_empty()) {
            return Err(ContentError::Empty("question"));
        }
        let typing_words: Vec<String> = typing_words
            .into_iter()
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .collect();
        if typing_words.is_empty() {
            return Err(ContentError::Empty("typing word"));
        }
        Ok(Self {
            questions: questions
                .into_iter()
                .filter(|q| !q.answers.is_empty())
                .collect(),
            typing_words,
        })
    }

    /// Built-in pools, used when no content directory is configured.
    pub fn builtin() -> Self {
        Self {
            questions: builtin_questions(),
            typing_words: BUILTIN_TYPING_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }

    /// Load pools from `dir`. A missing file falls back to the built-in pool;
    /// a present but unreadable or malformed file is an error.
    pub fn load(dir: &Path) -> Result<Self, ContentError> {
        let questions = match read_json::<Vec<Question>>(dir, QUESTIONS_FILE)? {
            Some(q) => q,
            None => builtin_questions(),
        };
        let typing_words = match read_json::<Vec<String>>(dir, TYPING_WORDS_FILE)? {
            Some(w) => w,
            None => BUILTIN_TYPING_WORDS.iter().map(|w| w.to_string()).collect(),
        };
        let pool = Self::new(questions, typing_words)?;
        tracing::info!(
            questions = pool.questions.len(),
            typing_words = pool.typing_words.len(),
            "Loaded content from {}",
            dir.display()
        );
        Ok(pool)
    }

    #[cfg(test)]
    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    #[cfg(test)]
    pub fn typing_word_count(&self) -> usize {
        self.typing_words.len()
    }

    /// Up to `count` distinct questions in random order.
    pub fn draw_questions<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<Question> {
        let mut pool = self.questions.clone();
        pool.shuffle(rng);
        pool.truncate(count);
        pool
    }

    /// The whole question pool, shuffled.
    pub fn shuffled_questions<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Question> {
        self.draw_questions(self.questions.len(), rng)
    }

    /// Up to `count` typing words in random order.
    pub fn draw_words<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<String> {
        let mut words = self.typing_words.clone();
        words.shuffle(rng);
        words.truncate(count);
        words
    }

    pub fn random_question<R: Rng + ?Sized>(&self, rng: &mut R) -> Question {
        self.questions
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| builtin_questions().remove(0))
    }

    pub fn random_word<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        self.typing_words
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| BUILTIN_TYPING_WORDS[0].to_string())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(dir: &Path, file: &str) -> Result<Option<T>, ContentError> {
    let path = dir.join(file);
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("{} not found, using built-in pool", path.display());
            return Ok(None);
        }
        Err(source) => {
            return Err(ContentError::Io {
                file: file.to_string(),
                source,
            })
        }
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| ContentError::Parse {
            file: file.to_string(),
            source,
        })
}

fn builtin_questions() -> Vec<Question> {
    vec![
        Question::new("What color is the sky on a clear day?", &["blue"]),
        Question::new("2 + 2 = ?", &["4", "four"]),
        Question::new("What's the first month of the year?", &["january"]),
        Question::new("What animal barks?", &["dog"]),
        Question::new("Name a primary color.", &["red", "blue", "yellow"]),
        Question::new("Opposite of 'up'?", &["down"]),
        Question::new("Water freezes at 0 degrees on which scale?", &["celsius"]),
        Question::new("Sun rises in the ____.", &["east"]),
        Question::new("What do bees produce?", &["honey"]),
        Question::new("Which planet is known as the red planet?", &["mars"]),
    ]
}

const BUILTIN_TYPING_WORDS: [&str; 30] = [
    "starlight", "nebula", "comet", "eclipse", "aurora", "galaxy", "meteor", "zenith",
    "orbit", "quasar", "pulsar", "nova", "cosmos", "lunar", "solstice", "equinox",
    "horizon", "twilight", "stardust", "spica", "dream", "wish", "cavern", "prayer",
    "crystal", "ember", "tempest", "whisper", "lantern", "voyage",
];
