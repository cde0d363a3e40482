//! Spoken feedback through external synth/player commands.
//!
//! One utterance plays at a time; callers from any thread serialize on
//! an internal lock so overlapping announcements cannot garble audio.

use rand::Rng;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("{command} exited with status {status}")]
    Failed { command: String, status: i32 },
}

pub trait Speech: Send + Sync {
    fn say(&self, text: &str) -> Result<(), SpeechError>;
}

/// Synthesizes to a temp WAV with one command and plays it with
/// another (espeak-ng + aplay by default).
pub struct CommandSpeech {
    synth: String,
    player: String,
    playing: Mutex<()>,
}

impl CommandSpeech {
    pub fn new(synth: &str, player: &str) -> Self {
        Self {
            synth: synth.to_string(),
            player: player.to_string(),
            playing: Mutex::new(()),
        }
    }

    fn temp_wav() -> PathBuf {
        let tag: u32 = rand::thread_rng().gen();
        std::env::temp_dir().join(format!("sightline-say-{tag:08x}.wav"))
    }

    fn run(command: &str, args: &[&str]) -> Result<(), SpeechError> {
        let status = Command::new(command)
            .args(args)
            .status()
            .map_err(|source| SpeechError::Spawn {
                command: command.to_string(),
                source,
            })?;
        if !status.success() {
            return Err(SpeechError::Failed {
                command: command.to_string(),
                status: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }
}

impl Speech for CommandSpeech {
    fn say(&self, text: &str) -> Result<(), SpeechError> {
        let _guard = self.playing.lock().unwrap_or_else(|e| e.into_inner());
        let wav = Self::temp_wav();
        let wav_str = wav.to_string_lossy().into_owned();

        let result = Self::run(&self.synth, &["-w", &wav_str, text])
            .and_then(|()| Self::run(&self.player, &[wav_str.as_str()]));

        if let Err(e) = std::fs::remove_file(&wav) {
            tracing::debug!(path = %wav.display(), error = %e, "temp wav cleanup failed");
        }
        result
    }
}

/// No-op speech for headless runs and tests.
pub struct NullSpeech;

impl Speech for NullSpeech {
    fn say(&self, text: &str) -> Result<(), SpeechError> {
        tracing::info!(text, "speech suppressed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_speech_always_succeeds() {
        assert!(NullSpeech.say("hello").is_ok());
    }

    #[test]
    fn test_missing_synth_reports_spawn_error() {
        let speech = CommandSpeech::new("sightline-no-such-synth", "sightline-no-such-player");
        match speech.say("hello") {
            Err(SpeechError::Spawn { command, .. }) => {
                assert_eq!(command, "sightline-no-such-synth");
            }
            other => panic!("expected spawn error, got {other:?}"),
        }
    }

    #[test]
    fn test_temp_paths_are_unique() {
        assert_ne!(CommandSpeech::temp_wav(), CommandSpeech::temp_wav());
    }
}
