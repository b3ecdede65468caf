//! Audio player session. Playback position is saved on a fixed interval while
//! playing, immediately on pause, and once more on close.

use std::sync::atomic::Ordering;

use tokio::sync::watch;

use crate::{
    domain::models::{ContentKind, ContentRequest, ProgressRecord},
    error::{AccessError, AccessResult},
};

use super::{
    ContentStream, ResumeChoice, SessionContext, SessionCore, SessionPhase, SessionSnapshot,
    Tracked, schedule::ScheduledTask, sync::SyncCommand,
};

/// Events of the host media element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackEvent {
    LoadedMetadata { duration: f64 },
    Play,
    Pause,
    TimeUpdate { elapsed: f64 },
    Ended,
}

pub struct AudiobookPlayerSession {
    core: SessionCore,
    stream: Option<ContentStream>,
    playing: bool,
    /// Latest `(elapsed, duration)` as seen by the autosave task.
    clock: watch::Sender<(f64, f64)>,
    autosave: ScheduledTask,
}

impl AudiobookPlayerSession {
    pub fn new(ctx: SessionContext, request: ContentRequest) -> AccessResult<Self> {
        if request.kind != ContentKind::Audiobook {
            return Err(AccessError::UnknownContentKind(request.kind.wire_name().to_string()));
        }
        let core = SessionCore::new(ctx, request)?;
        let (clock, _) = watch::channel((core.position(), core.total()));
        Ok(Self {
            core,
            stream: None,
            playing: false,
            clock,
            autosave: ScheduledTask::idle(),
        })
    }

    /// Acquire the audio stream, protect the player, then look up saved progress.
    /// When the stream does not announce a duration the saved record's own total
    /// is used until metadata arrives.
    pub async fn load(&mut self) -> AccessResult<SessionPhase> {
        let stream = self.core.acquire_stream().await?;
        let duration = stream.duration_secs.filter(|d| d.is_finite() && *d > 0.0);
        self.stream = Some(stream);

        self.core.enable_guard();
        let saved = self.core.load_progress().await;
        let phase = self.core.decide(saved, duration.unwrap_or(0.0));
        self.publish();
        Ok(phase)
    }

    fn publish(&self) {
        self.clock.send_replace((self.core.position(), self.core.total()));
    }

    pub fn core(&self) -> &SessionCore {
        &self.core
    }

    pub fn stream(&self) -> Option<&ContentStream> {
        self.stream.as_ref()
    }

    #[cfg(test)]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn resolve(&mut self, choice: ResumeChoice) -> AccessResult<f64> {
        let position = self.core.resolve(choice)?;
        self.publish();
        Ok(position)
    }

    pub fn handle(&mut self, event: PlaybackEvent) -> AccessResult<()> {
        match event {
            PlaybackEvent::LoadedMetadata { duration } => self.loaded_metadata(duration),
            PlaybackEvent::Play => self.play()?,
            PlaybackEvent::Pause => self.pause(),
            PlaybackEvent::TimeUpdate { elapsed } => {
                self.time_update(elapsed);
            }
            PlaybackEvent::Ended => self.ended(),
        }
        Ok(())
    }

    pub fn loaded_metadata(&mut self, duration: f64) {
        self.core.set_total(duration);
        self.publish();
        tracing::debug!(duration, "audio metadata loaded");
    }

    /// Start periodic saving. Refused while the resume prompt is open.
    pub fn play(&mut self) -> AccessResult<()> {
        self.core.require(&[SessionPhase::Active])?;
        if self.playing {
            return Ok(());
        }
        self.playing = true;
        if self.core.is_finished() {
            return Ok(());
        }
        let Some(tx) = self.core.sync_sender() else {
            return Ok(());
        };
        let dirty = self.core.dirty_flag();
        let clock = self.clock.subscribe();
        let content_id = self.core.content_id().clone();
        self.autosave.every(self.core.settings().save_interval, move || {
            let due = dirty.swap(false, Ordering::SeqCst);
            let (elapsed, total) = *clock.borrow();
            let record =
                ProgressRecord::new(content_id.clone(), ContentKind::Audiobook, elapsed, total);
            let tx = tx.clone();
            async move {
                if due {
                    tx.send(SyncCommand::Save(record));
                }
            }
        });
        Ok(())
    }

    /// Stop periodic saving and save right away.
    pub fn pause(&mut self) {
        if !self.playing {
            return;
        }
        self.playing = false;
        self.autosave.cancel();
        self.core.save_now();
    }

    pub fn time_update(&mut self, elapsed: f64) -> Tracked {
        let tracked = self.core.track(elapsed);
        match tracked {
            Tracked::Advanced => self.publish(),
            Tracked::Completed => self.autosave.cancel(),
            Tracked::Ignored | Tracked::Suppressed => {}
        }
        tracked
    }

    pub fn ended(&mut self) {
        let total = self.core.total();
        if total > 0.0 {
            self.time_update(total);
        }
        self.pause();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.core.snapshot()
    }

    pub async fn close(&mut self) -> bool {
        self.autosave.cancel();
        self.playing = false;
        let closed = self.core.close().await;
        self.stream = None;
        closed
    }
}
