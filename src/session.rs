//! State of one run: the loaded audio and its current analysis.

use thiserror::Error;

use crate::analysis::{AnalyzeError, Analyzer};
use crate::client::GenerativeModel;
use crate::input::AudioInput;
use crate::media::{MediaLease, MediaStore};
use crate::model::{AudioMetadata, SongAnalysis};
use crate::retry::Sleeper;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("An analysis is already running")]
    Busy,
    #[error("No audio loaded")]
    NoAudio,
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
}

/// Where the current analysis stands.
#[derive(Debug, Clone, Default)]
pub enum AnalysisState {
    #[default]
    Idle,
    InFlight,
    Ready(SongAnalysis),
    Failed(String),
}

/// Where the loaded audio lives.
#[derive(Debug)]
pub enum AudioSource {
    /// Inline bytes, held only through the store.
    Leased(MediaLease),
    Link(String),
}

/// The audio a session is working on.
#[derive(Debug)]
pub struct LoadedAudio {
    pub source: AudioSource,
    pub metadata: AudioMetadata,
}

impl LoadedAudio {
    pub fn lease(&self) -> Option<&MediaLease> {
        match &self.source {
            AudioSource::Leased(lease) => Some(lease),
            AudioSource::Link(_) => None,
        }
    }

    /// Model input for this audio, read back through the live lease.
    pub fn input(&self) -> Option<AudioInput> {
        match &self.source {
            AudioSource::Leased(lease) => lease.entry().map(|entry| AudioInput::Inline {
                bytes: entry.bytes,
                mime_type: entry.mime_type,
            }),
            AudioSource::Link(url) => Some(AudioInput::Url(url.clone())),
        }
    }
}

/// Application state for one run: the loaded audio and its analysis.
#[derive(Debug, Default)]
pub struct Session {
    store: MediaStore,
    audio: Option<LoadedAudio>,
    state: AnalysisState,
}

impl Session {
    pub fn new(store: MediaStore) -> Self {
        Self {
            store,
            audio: None,
            state: AnalysisState::Idle,
        }
    }

    /// Load new audio, revoking the previous handle and clearing any result.
    pub fn load_audio(&mut self, input: AudioInput, metadata: AudioMetadata) -> Result<(), SessionError> {
        if matches!(self.state, AnalysisState::InFlight) {
            return Err(SessionError::Busy);
        }
        let source = match input {
            AudioInput::Inline { bytes, mime_type } => {
                AudioSource::Leased(self.store.create(bytes, &mime_type))
            }
            AudioInput::Url(url) => AudioSource::Link(url),
        };
        // Old lease drops here.
        self.audio = Some(LoadedAudio { source, metadata });
        self.state = AnalysisState::Idle;
        Ok(())
    }

    pub fn audio(&self) -> Option<&LoadedAudio> {
        self.audio.as_ref()
    }

    pub fn state(&self) -> &AnalysisState {
        &self.state
    }

    pub fn analysis(&self) -> Option<&SongAnalysis> {
        match &self.state {
            AnalysisState::Ready(a) => Some(a),
            _ => None,
        }
    }

    /// Mark an analysis as started. Rejected while another is in flight.
    pub fn begin_analysis(&mut self) -> Result<(), SessionError> {
        if self.audio.is_none() {
            return Err(SessionError::NoAudio);
        }
        if matches!(self.state, AnalysisState::InFlight) {
            return Err(SessionError::Busy);
        }
        self.state = AnalysisState::InFlight;
        Ok(())
    }

    /// Record the outcome. A success replaces the previous result wholesale.
    pub fn finish_analysis(
        &mut self,
        result: Result<SongAnalysis, AnalyzeError>,
    ) -> Result<SongAnalysis, SessionError> {
        match result {
            Ok(analysis) => {
                log::info!(
                    "Analysis ready: {} chords, {} sections",
                    analysis.chords.len(),
                    analysis.sections.len()
                );
                self.state = AnalysisState::Ready(analysis.clone());
                Ok(analysis)
            }
            Err(e) => {
                self.state = AnalysisState::Failed(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Analyze the loaded audio end to end.
    pub fn run_analysis<M: GenerativeModel, S: Sleeper>(
        &mut self,
        analyzer: &Analyzer<M, S>,
    ) -> Result<SongAnalysis, SessionError> {
        self.begin_analysis()?;
        let audio = self.audio.as_ref().ok_or(SessionError::NoAudio)?;
        let result = match audio.input() {
            Some(input) => analyzer.analyze(&input, &audio.metadata),
            None => {
                self.state = AnalysisState::Failed(SessionError::NoAudio.to_string());
                return Err(SessionError::NoAudio);
            }
        };
        self.finish_analysis(result)
    }
}
