//! EPG scrape worker: a FIFO queue drained by a single dedicated
//! consumer thread that shells out to an external program per item and
//! merges its JSON output back into the EPG model.

use std::collections::VecDeque;
use std::io::Write as _;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::epg::model::{EpgModel, EpisodeNumber};
use crate::error::ScrapeError;
use crate::utils::Clock;

/// How long a broadcast whose scrape failed waits before it's eligible
/// to be enqueued again. Bounds retries without leaving the in-progress
/// flag permanently stuck (see DESIGN.md).
const SCRAPE_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Consumer loop's idle yield between items.
const CONSUMER_YIELD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default)]
pub struct ScrapeConfig {
    pub enabled: bool,
    pub exec: Option<String>,
}

#[derive(Debug, Serialize)]
struct ScrapeInput {
    start: i64,
    stop: i64,
    scraped: i64,
    updated: i64,
    channel_name: String,
    title: String,
    description: String,
    summary: String,
    content_type: u32,
}

#[derive(Debug, Default, Deserialize)]
struct BrandOutput {
    title: Option<String>,
    summary: Option<String>,
    season_count: Option<u32>,
    image: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SeasonOutput {
    summary: Option<String>,
    season_number: Option<u32>,
    episode_count: Option<u32>,
    image: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EpisodeOutput {
    title: Option<String>,
    subtitle: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    image: Option<String>,
    age_rating: Option<u32>,
    star_rating: Option<u32>,
    first_aired: Option<i64>,
    episode_number: Option<u32>,
    episode_count: Option<u32>,
    season_number: Option<u32>,
    season_count: Option<u32>,
    part_number: Option<u32>,
    part_count: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ScrapeOutput {
    language: Option<String>,
    brand: Option<BrandOutput>,
    season: Option<SeasonOutput>,
    episode: Option<EpisodeOutput>,
}

struct ScrapeItem {
    epg_id: u32,
    input: ScrapeInput,
}

/// Background scrape worker: one FIFO queue, one consumer thread, one
/// external program invocation per queue item.
pub struct ScrapeWorker {
    queue: Mutex<VecDeque<ScrapeItem>>,
    not_empty: Condvar,
    config: Mutex<ScrapeConfig>,
    model: Arc<EpgModel>,
    cooldown: DashMap<u32, Instant>,
    clock: Arc<dyn Clock>,
    shutdown: AtomicBool,
}

impl ScrapeWorker {
    #[must_use]
    pub fn spawn(model: Arc<EpgModel>, config: ScrapeConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        let worker = Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            config: Mutex::new(config),
            model,
            cooldown: DashMap::new(),
            clock,
            shutdown: AtomicBool::new(false),
        });

        let thread_worker = Arc::clone(&worker);
        std::thread::Builder::new()
            .name("epg-scrape".into())
            .spawn(move || thread_worker.run())
            .expect("failed to spawn scrape consumer thread");

        worker
    }

    #[must_use]
    pub fn get_config(&self) -> ScrapeConfig {
        self.config.lock().clone()
    }

    /// Updates the worker's config and, if it changed, wakes the
    /// consumer so a newly-enabled worker notices queued work right
    /// away.
    pub fn set_config(&self, new_config: ScrapeConfig) {
        let mut config = self.config.lock();
        let changed = config.enabled != new_config.enabled || config.exec != new_config.exec;
        *config = new_config;
        drop(config);
        if changed {
            self.not_empty.notify_all();
        }
    }

    /// Enqueues a broadcast for scraping, refusing when scraping is
    /// disabled, the broadcast is already in progress or completed, or
    /// it's still inside its cooldown window (see DESIGN.md).
    pub fn enqueue_broadcast(&self, epg_id: u32) -> Result<(), ScrapeError> {
        if !self.config.lock().enabled {
            return Err(ScrapeError::EnqueueRefused("scraping is disabled"));
        }
        if self.model.is_in_progress(epg_id) {
            return Err(ScrapeError::EnqueueRefused("broadcast is already being scraped"));
        }
        if self.model.is_completed(epg_id) {
            return Err(ScrapeError::EnqueueRefused("broadcast already scraped"));
        }
        if let Some(last) = self.cooldown.get(&epg_id) {
            if self.clock.now().duration_since(*last) < SCRAPE_COOLDOWN {
                return Err(ScrapeError::EnqueueRefused("broadcast is in scrape cooldown"));
            }
        }

        let Some(input) = self.model.with_broadcast(epg_id, |b| ScrapeInput {
            start: b.start,
            stop: b.stop,
            scraped: b.scraped,
            updated: b.updated,
            channel_name: b.channel_name.clone(),
            title: b.title.clone(),
            description: b.description.clone(),
            summary: b.summary.clone(),
            content_type: b.content_type,
        }) else {
            return Err(ScrapeError::EnqueueRefused("no such broadcast"));
        };

        self.model.set_in_progress(epg_id, true);

        let mut queue = self.queue.lock();
        queue.push_back(ScrapeItem { epg_id, input });
        self.not_empty.notify_one();
        log::debug!("scrape: enqueued broadcast {epg_id}");
        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.not_empty.notify_all();
    }

    fn run(self: Arc<Self>) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }

            let item = {
                let mut queue = self.queue.lock();
                loop {
                    if self.shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    if !self.config.lock().enabled {
                        self.not_empty.wait(&mut queue);
                        continue;
                    }
                    if let Some(item) = queue.pop_front() {
                        break item;
                    }
                    self.not_empty.wait(&mut queue);
                }
            };

            self.process_item(item);
            std::thread::sleep(CONSUMER_YIELD);
        }
    }

    fn run_exec(&self, exec: &str, input: &ScrapeInput) -> Result<ScrapeOutput, ScrapeError> {
        let payload = serde_json::to_vec(input).map_err(ScrapeError::UnparseableOutput)?;

        let mut child = Command::new(exec)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(ScrapeError::SpawnFailed)?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(&payload);
        }

        let output = child.wait_with_output().map_err(ScrapeError::SpawnFailed)?;
        if !output.status.success() {
            return Err(ScrapeError::NonZeroExit(output.status.code().unwrap_or(-1)));
        }
        if output.stdout.is_empty() {
            return Ok(ScrapeOutput::default());
        }
        serde_json::from_slice(&output.stdout).map_err(ScrapeError::UnparseableOutput)
    }

    fn process_item(&self, item: ScrapeItem) {
        let epg_id = item.epg_id;
        let exec = self.config.lock().exec.clone();

        let result = match exec {
            Some(exec) => self.run_exec(&exec, &item.input),
            None => Err(ScrapeError::EnqueueRefused("no scraper executable configured")),
        };

        self.model.set_in_progress(epg_id, false);
        self.model.set_scraped(epg_id, self.model_now());

        match result {
            Ok(output) => {
                if self.merge_output(epg_id, &output) {
                    log::info!("scrape: merged update for broadcast {epg_id}");
                } else {
                    log::debug!("scrape: output for broadcast {epg_id} changed nothing");
                }
                self.model.set_completed(epg_id, true);
                self.cooldown.remove(&epg_id);
            }
            Err(err) => {
                log::warn!("scrape: failed for broadcast {epg_id}: {err}");
                self.cooldown.insert(epg_id, self.clock.now());
            }
        }
    }

    fn model_now(&self) -> i64 {
        crate::utils::now_unix_secs()
    }

    /// Merges scraped fields into the EPG model, presence-gated field
    /// by field. Returns whether anything changed.
    fn merge_output(&self, epg_id: u32, output: &ScrapeOutput) -> bool {
        let Some(episode_id) = self.model.episode_id_for(epg_id) else {
            return false;
        };

        let mut changed = false;
        let mut epnum = EpisodeNumber::default();
        if let Some(result) = self.model.with_episode_mut(episode_id, |e| e.epnum) {
            epnum = result;
        }

        if let Some(brand_out) = &output.brand {
            let brand_id = self.model.ensure_brand(epg_id);
            if let (Some(title), Some(brand_id)) = (&brand_out.title, brand_id) {
                changed |= self
                    .model
                    .with_brand_mut(brand_id, |b| {
                        set_if_changed(&mut b.title, title) | apply_language(&mut b.language, &output.language)
                    })
                    .unwrap_or(false);
                changed |= self
                    .model
                    .with_episode_mut(episode_id, |e| {
                        set_if_changed(&mut e.title, title) | apply_language(&mut e.language, &output.language)
                    })
                    .unwrap_or(false);
            }
            if let (Some(summary), Some(brand_id)) = (&brand_out.summary, brand_id) {
                changed |= self
                    .model
                    .with_brand_mut(brand_id, |b| {
                        set_if_changed(&mut b.summary, summary) | apply_language(&mut b.language, &output.language)
                    })
                    .unwrap_or(false);
            }
            if let Some(season_count) = brand_out.season_count {
                if season_count != 0 {
                    if let Some(brand_id) = brand_id {
                        changed |= self
                            .model
                            .with_brand_mut(brand_id, |b| set_u32_if_changed(&mut b.season_count, season_count))
                            .unwrap_or(false);
                    }
                    epnum.season_count = season_count;
                }
            }
            if let (Some(image), Some(brand_id)) = (&brand_out.image, brand_id) {
                changed |= self
                    .model
                    .with_brand_mut(brand_id, |b| set_if_changed(&mut b.image, image))
                    .unwrap_or(false);
            }
        }

        if let Some(season_out) = &output.season {
            let season_id = self.model.ensure_season(epg_id);
            if let (Some(summary), Some(season_id)) = (&season_out.summary, season_id) {
                changed |= self
                    .model
                    .with_season_mut(season_id, |s| {
                        set_if_changed(&mut s.summary, summary) | apply_language(&mut s.language, &output.language)
                    })
                    .unwrap_or(false);
            }
            if let Some(number) = season_out.season_number {
                if number != 0 {
                    if let Some(season_id) = season_id {
                        changed |= self
                            .model
                            .with_season_mut(season_id, |s| set_u32_if_changed(&mut s.number, number))
                            .unwrap_or(false);
                    }
                    epnum.season_number = number;
                }
            }
            if let Some(count) = season_out.episode_count {
                if count != 0 {
                    if let Some(season_id) = season_id {
                        changed |= self
                            .model
                            .with_season_mut(season_id, |s| set_u32_if_changed(&mut s.episode_count, count))
                            .unwrap_or(false);
                    }
                    epnum.episode_count = count;
                }
            }
            if let (Some(image), Some(season_id)) = (&season_out.image, season_id) {
                changed |= self
                    .model
                    .with_season_mut(season_id, |s| set_if_changed(&mut s.image, image))
                    .unwrap_or(false);
            }
        }

        if let Some(ep_out) = &output.episode {
            changed |= self
                .model
                .with_episode_mut(episode_id, |e| {
                    let mut local_change = false;
                    if let Some(v) = &ep_out.title {
                        local_change |= set_if_changed(&mut e.title, v);
                        local_change |= apply_language(&mut e.language, &output.language);
                    }
                    if let Some(v) = &ep_out.subtitle {
                        local_change |= set_if_changed(&mut e.subtitle, v);
                        local_change |= apply_language(&mut e.language, &output.language);
                    }
                    if let Some(v) = &ep_out.summary {
                        local_change |= set_if_changed(&mut e.summary, v);
                        local_change |= apply_language(&mut e.language, &output.language);
                    }
                    if let Some(v) = &ep_out.description {
                        local_change |= set_if_changed(&mut e.description, v);
                        local_change |= apply_language(&mut e.language, &output.language);
                    }
                    if let Some(v) = &ep_out.image {
                        local_change |= set_if_changed(&mut e.image, v);
                    }
                    if let Some(v) = ep_out.age_rating {
                        local_change |= set_u32_if_changed(&mut e.age_rating, v);
                    }
                    if let Some(v) = ep_out.star_rating {
                        local_change |= set_u32_if_changed(&mut e.star_rating, v);
                    }
                    if let Some(v) = ep_out.first_aired {
                        if v != 0 && e.first_aired != v {
                            e.first_aired = v;
                            local_change = true;
                        }
                    }
                    local_change
                })
                .unwrap_or(false);

            if let Some(v) = ep_out.episode_number {
                if v != 0 {
                    epnum.episode_number = v;
                }
            }
            if let Some(v) = ep_out.episode_count {
                if v != 0 {
                    epnum.episode_count = v;
                }
            }
            if let Some(v) = ep_out.season_number {
                if v != 0 {
                    epnum.season_number = v;
                }
            }
            if let Some(v) = ep_out.season_count {
                if v != 0 {
                    epnum.season_count = v;
                }
            }
            if let Some(v) = ep_out.part_number {
                if v != 0 {
                    epnum.part_number = v;
                }
            }
            if let Some(v) = ep_out.part_count {
                if v != 0 {
                    epnum.part_count = v;
                }
            }
        }

        changed |= self
            .model
            .with_episode_mut(episode_id, |e| {
                if e.epnum != epnum {
                    e.epnum = epnum;
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);

        changed
    }
}

fn set_if_changed(field: &mut String, value: &str) -> bool {
    if field != value {
        field.clear();
        field.push_str(value);
        true
    } else {
        false
    }
}

fn set_u32_if_changed(field: &mut u32, value: u32) -> bool {
    if *field != value {
        *field = value;
        true
    } else {
        false
    }
}

/// Tags a text field with the scrape output's language, when it reported
/// one. Mirrors title/summary/description/subtitle setters taking a
/// language alongside the string; numeric and image fields never do.
fn apply_language(field: &mut String, language: &Option<String>) -> bool {
    match language {
        Some(lang) => set_if_changed(field, lang),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epg::model::Broadcast;
    use crate::utils::SystemClock;

    fn model_with_broadcast() -> (Arc<EpgModel>, u32) {
        let model = Arc::new(EpgModel::new());
        let id = model.insert_broadcast(Broadcast {
            title: "Old Title".into(),
            ..Default::default()
        });
        (model, id)
    }

    #[test]
    fn enqueue_refused_when_disabled() {
        let (model, id) = model_with_broadcast();
        let worker = ScrapeWorker::spawn(model, ScrapeConfig::default(), Arc::new(SystemClock));
        let err = worker.enqueue_broadcast(id).unwrap_err();
        assert!(matches!(err, ScrapeError::EnqueueRefused(_)));
        worker.shutdown();
    }

    #[test]
    fn enqueue_refused_when_already_in_progress() {
        let (model, id) = model_with_broadcast();
        model.set_in_progress(id, true);
        let worker = ScrapeWorker::spawn(
            model,
            ScrapeConfig { enabled: true, exec: None },
            Arc::new(SystemClock),
        );
        let err = worker.enqueue_broadcast(id).unwrap_err();
        assert!(matches!(err, ScrapeError::EnqueueRefused(_)));
        worker.shutdown();
    }

    #[test]
    fn merge_is_monotonic_on_empty_output() {
        let (model, id) = model_with_broadcast();
        let worker = ScrapeWorker::spawn(
            Arc::clone(&model),
            ScrapeConfig { enabled: true, exec: None },
            Arc::new(SystemClock),
        );
        let changed = worker.merge_output(id, &ScrapeOutput::default());
        assert!(!changed);
        worker.shutdown();
    }

    #[test]
    fn merge_applies_presence_gated_episode_fields() {
        let (model, id) = model_with_broadcast();
        let worker = ScrapeWorker::spawn(
            Arc::clone(&model),
            ScrapeConfig { enabled: true, exec: None },
            Arc::new(SystemClock),
        );

        let output = ScrapeOutput {
            language: None,
            brand: None,
            season: None,
            episode: Some(EpisodeOutput {
                title: Some("New Title".into()),
                episode_number: Some(4),
                season_number: Some(2),
                ..Default::default()
            }),
        };

        assert!(worker.merge_output(id, &output));
        let episode_id = model.episode_id_for(id).unwrap();
        let title = model.with_episode_mut(episode_id, |e| e.title.clone()).unwrap();
        assert_eq!(title, "New Title");
        let epnum = model.with_episode_mut(episode_id, |e| e.epnum).unwrap();
        assert_eq!(epnum.episode_number, 4);
        assert_eq!(epnum.season_number, 2);

        worker.shutdown();
    }

    #[test]
    fn merge_tags_brand_and_episode_text_fields_with_language() {
        let (model, id) = model_with_broadcast();
        let worker = ScrapeWorker::spawn(
            Arc::clone(&model),
            ScrapeConfig { enabled: true, exec: None },
            Arc::new(SystemClock),
        );

        let output = ScrapeOutput {
            language: Some("fre".into()),
            brand: Some(BrandOutput {
                title: Some("Les Informations".into()),
                ..Default::default()
            }),
            season: None,
            episode: Some(EpisodeOutput {
                description: Some("Le bulletin du soir.".into()),
                ..Default::default()
            }),
        };

        assert!(worker.merge_output(id, &output));
        let episode_id = model.episode_id_for(id).unwrap();
        let brand_id = model.ensure_brand(id).unwrap();

        let brand_language = model.with_brand_mut(brand_id, |b| b.language.clone()).unwrap();
        assert_eq!(brand_language, "fre");
        let episode_language = model.with_episode_mut(episode_id, |e| e.language.clone()).unwrap();
        assert_eq!(episode_language, "fre");

        worker.shutdown();
    }

    #[test]
    fn successful_scrape_marks_broadcast_completed() {
        let (model, id) = model_with_broadcast();
        // `cat` echoes the JSON input straight back on stdout; none of its
        // field names match `ScrapeOutput`'s, so this merges nothing, but
        // it does exit zero and exercises the real `Ok(output)` path.
        let worker = ScrapeWorker::spawn(
            Arc::clone(&model),
            ScrapeConfig { enabled: true, exec: Some("cat".into()) },
            Arc::new(SystemClock),
        );

        assert!(!model.is_completed(id));
        worker.process_item(ScrapeItem {
            epg_id: id,
            input: ScrapeInput {
                start: 0,
                stop: 0,
                scraped: 0,
                updated: 0,
                channel_name: String::new(),
                title: String::new(),
                description: String::new(),
                summary: String::new(),
                content_type: 0,
            },
        });
        assert!(model.is_completed(id));

        worker.shutdown();
    }
}
