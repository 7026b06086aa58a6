//! Progressive "scan" reveal
//!
//! One [`ScanSequencer`] owns an arena of [`ScanTask`]s and ticks them all
//! against a single clock. Surfaces are visited family by family, bottom to
//! top, each going through a pulsing highlight and then an eased fade into
//! its final x-ray look.

use marionette_core::config::ScanConfig;
use marionette_core::surface::{Family, SurfaceClass};
use std::collections::HashSet;
use std::f32::consts::TAU;
use tracing::{debug, info};

use crate::appearance::SurfaceMaterial;
use crate::kinematics::SurfaceId;

const HIGHLIGHT_OPACITY: f32 = 0.85;
const HIGHLIGHT_RIM: f32 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ScanSettings {
    /// Nominal length of a run; the last surface starts at `total - per_surface`
    pub total_duration: f32,
    pub per_surface: f32,
    /// Share of `per_surface` spent in the pulsing highlight
    pub scan_ratio: f32,
    pub pulse_hz: f32,
    pub highlight_color: [f32; 3],
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from_config(&ScanConfig::default())
    }
}

impl ScanSettings {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            total_duration: config.total_duration_secs.max(0.0),
            per_surface: config.per_surface_secs.max(0.0),
            scan_ratio: config.scan_ratio.clamp(0.0, 1.0),
            pulse_hz: config.pulse_hz,
            highlight_color: config.highlight_color,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Waiting,
    Scanning,
    Transitioning,
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanTask {
    pub surface: SurfaceId,
    pub family: Family,
    /// Offset from the run start
    pub start_delay: f32,
    pub highlight_duration: f32,
    pub state: ScanState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanRun {
    pub start_time: f32,
    pub tasks: Vec<ScanTask>,
    pub scanned_count: usize,
}

impl ScanRun {
    pub fn total(&self) -> usize {
        self.tasks.len()
    }

    /// Time (relative to the start) at which the last surface finishes
    pub fn end_offset(&self) -> f32 {
        self.tasks
            .last()
            .map(|t| t.start_delay + t.highlight_duration)
            .unwrap_or(0.0)
    }
}

/// Surface data the sequencer needs to plan a run
#[derive(Debug, Clone, PartialEq)]
pub struct ScanCandidate {
    pub surface: SurfaceId,
    pub family: Family,
    pub class: SurfaceClass,
    pub is_outline: bool,
    /// World-space vertical position
    pub height: f32,
}

/// What a surface should look like this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScanVisual {
    /// Pulsing highlight, `pulse` in 0..=1
    Highlight { pulse: f32 },
    /// Eased progress from highlight to final x-ray, 0..=1
    Fade { t: f32 },
    /// Done: the cached x-ray material takes over
    Final,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanNotification {
    SurfaceStarted {
        surface: SurfaceId,
        index: usize,
        total: usize,
    },
    Complete,
}

/// Receiver of scan progress
pub trait ScanObserver {
    /// `index` is 1-based and strictly increasing within a run
    fn surface_started(&mut self, surface: SurfaceId, index: usize, total: usize);
    fn scan_complete(&mut self);
}

impl ScanObserver for Vec<ScanNotification> {
    fn surface_started(&mut self, surface: SurfaceId, index: usize, total: usize) {
        self.push(ScanNotification::SurfaceStarted {
            surface,
            index,
            total,
        });
    }

    fn scan_complete(&mut self) {
        self.push(ScanNotification::Complete);
    }
}

pub fn ease_out_cubic(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t).powi(3)
}

pub fn ease_in_out_cubic(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

/// Material a scanned surface shows for `visual`, fading into `target`
pub fn scan_material(visual: ScanVisual, highlight: [f32; 3], target: &SurfaceMaterial) -> SurfaceMaterial {
    match visual {
        ScanVisual::Final => target.clone(),
        ScanVisual::Highlight { pulse } => {
            let gain = 0.7 + 0.3 * pulse;
            SurfaceMaterial::XRay {
                color: highlight.map(|c| c * gain),
                opacity: HIGHLIGHT_OPACITY,
                rim_intensity: HIGHLIGHT_RIM + pulse,
                rim_power: 1.0,
            }
        }
        ScanVisual::Fade { t } => {
            let (color, opacity, rim_intensity, rim_power) = match target {
                SurfaceMaterial::XRay {
                    color,
                    opacity,
                    rim_intensity,
                    rim_power,
                } => (*color, *opacity, *rim_intensity, *rim_power),
                SurfaceMaterial::Flat { color } | SurfaceMaterial::Wireframe { color } => (*color, 1.0, 0.0, 1.0),
                SurfaceMaterial::Shaded { color, .. } => ([color[0], color[1], color[2]], color[3], 0.0, 1.0),
            };
            SurfaceMaterial::XRay {
                color: [
                    lerp(highlight[0], color[0], t),
                    lerp(highlight[1], color[1], t),
                    lerp(highlight[2], color[2], t),
                ],
                opacity: lerp(HIGHLIGHT_OPACITY, opacity, t),
                rim_intensity: lerp(HIGHLIGHT_RIM, rim_intensity, t),
                rim_power: lerp(1.0, rim_power, t),
            }
        }
    }
}

/// Visit order: shells, outlines and faulted surfaces excluded, then by
/// family order, then bottom to top, ties broken by id
pub fn plan_order(candidates: &[ScanCandidate], faulted: &HashSet<SurfaceId>) -> Vec<ScanCandidate> {
    let mut eligible: Vec<ScanCandidate> = candidates
        .iter()
        .filter(|c| c.class != SurfaceClass::Shell && !c.is_outline && !faulted.contains(&c.surface))
        .cloned()
        .collect();
    eligible.sort_by(|a, b| {
        a.family
            .rank()
            .cmp(&b.family.rank())
            .then(a.height.total_cmp(&b.height))
            .then(a.surface.cmp(&b.surface))
    });
    eligible
}

/// Start offsets spread so the last surface finishes at the nominal total
pub fn start_offsets(count: usize, total_duration: f32, per_surface: f32) -> Vec<f32> {
    let span = (total_duration - per_surface).max(0.0);
    match count {
        0 => Vec::new(),
        1 => vec![0.0],
        n => (0..n).map(|i| span * i as f32 / (n - 1) as f32).collect(),
    }
}

#[derive(Debug, Default)]
pub struct ScanSequencer {
    settings: ScanSettings,
    run: Option<ScanRun>,
}

impl ScanSequencer {
    pub fn new(settings: ScanSettings) -> Self {
        Self { settings, run: None }
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: ScanSettings) {
        self.settings = settings;
    }

    pub fn is_active(&self) -> bool {
        self.run.is_some()
    }

    pub fn run(&self) -> Option<&ScanRun> {
        self.run.as_ref()
    }

    /// Begin a run at `now`. Returns false, changing nothing, if one is active.
    pub fn start(&mut self, now: f32, candidates: &[ScanCandidate], faulted: &HashSet<SurfaceId>) -> bool {
        if self.run.is_some() {
            debug!("Scan already running, ignoring start request");
            return false;
        }

        let order = plan_order(candidates, faulted);
        let offsets = start_offsets(order.len(), self.settings.total_duration, self.settings.per_surface);
        let tasks: Vec<ScanTask> = order
            .into_iter()
            .zip(offsets)
            .map(|(candidate, start_delay)| ScanTask {
                surface: candidate.surface,
                family: candidate.family,
                start_delay,
                highlight_duration: self.settings.per_surface,
                state: ScanState::Waiting,
            })
            .collect();

        info!(surfaces = tasks.len(), "Scan started");
        self.run = Some(ScanRun {
            start_time: now,
            tasks,
            scanned_count: 0,
        });
        true
    }

    /// Drop the current run; materials stay as they are
    pub fn cancel(&mut self) -> bool {
        let cancelled = self.run.take().is_some();
        if cancelled {
            info!("Scan cancelled");
        }
        cancelled
    }

    /// Advance every task to `now`, returning the surfaces whose look changed
    pub fn tick(&mut self, now: f32, observer: &mut dyn ScanObserver) -> Vec<(SurfaceId, ScanVisual)> {
        let Some(run) = self.run.as_mut() else {
            return Vec::new();
        };

        let elapsed = now - run.start_time;
        let total = run.tasks.len();
        let ratio = self.settings.scan_ratio;
        let pulse_hz = self.settings.pulse_hz;
        let mut visuals = Vec::new();

        for (i, task) in run.tasks.iter_mut().enumerate() {
            let local = elapsed - task.start_delay;
            if task.state == ScanState::Complete || local < 0.0 {
                continue;
            }

            if task.state == ScanState::Waiting {
                task.state = ScanState::Scanning;
                observer.surface_started(task.surface, i + 1, total);
            }

            let progress = if task.highlight_duration > 0.0 {
                local / task.highlight_duration
            } else {
                1.0
            };

            if task.state == ScanState::Scanning {
                if progress < ratio {
                    let pulse = 0.5 + 0.5 * (TAU * pulse_hz * local).sin();
                    visuals.push((task.surface, ScanVisual::Highlight { pulse }));
                    continue;
                }
                task.state = ScanState::Transitioning;
            }

            if progress < 1.0 {
                let span = (1.0 - ratio).max(f32::EPSILON);
                let t = ease_out_cubic((progress - ratio) / span);
                visuals.push((task.surface, ScanVisual::Fade { t }));
            } else {
                task.state = ScanState::Complete;
                run.scanned_count += 1;
                visuals.push((task.surface, ScanVisual::Final));
            }
        }

        if run.scanned_count == total && elapsed >= run.end_offset() {
            info!(surfaces = total, "Scan complete");
            self.run = None;
            observer.scan_complete();
        }
        visuals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: u32, family: Family, height: f32) -> ScanCandidate {
        ScanCandidate {
            surface: SurfaceId(id),
            family,
            class: SurfaceClass::Generic,
            is_outline: false,
            height,
        }
    }

    fn settings(total: f32, per: f32) -> ScanSettings {
        ScanSettings {
            total_duration: total,
            per_surface: per,
            ..ScanSettings::default()
        }
    }

    #[test]
    fn test_scan_material_fades_into_target() {
        let target = SurfaceMaterial::XRay {
            color: [0.4, 0.75, 1.0],
            opacity: 0.25,
            rim_intensity: 0.6,
            rim_power: 2.0,
        };
        let highlight = [0.2, 1.0, 0.6];

        match scan_material(ScanVisual::Fade { t: 0.0 }, highlight, &target) {
            SurfaceMaterial::XRay { color, opacity, .. } => {
                assert_eq!(color, highlight);
                assert_eq!(opacity, HIGHLIGHT_OPACITY);
            }
            other => panic!("unexpected material {:?}", other),
        }
        assert_eq!(scan_material(ScanVisual::Fade { t: 1.0 }, highlight, &target), target);
        assert_eq!(scan_material(ScanVisual::Final, highlight, &target), target);
        assert!(matches!(
            scan_material(ScanVisual::Highlight { pulse: 1.0 }, highlight, &target),
            SurfaceMaterial::XRay { color: [_, g, _], .. } if g == 1.0
        ));
    }

    #[test]
    fn test_order_family_then_height() {
        let mut candidates = vec![
            candidate(0, Family::Head, 0.3),
            candidate(1, Family::Base, 0.05),
            candidate(2, Family::Body, 0.2),
            candidate(3, Family::Body, 0.1),
            candidate(4, Family::Antenna, 0.4),
            candidate(5, Family::Body, 0.1),
            candidate(6, Family::Other, 0.0),
        ];
        candidates.push(ScanCandidate {
            class: SurfaceClass::Shell,
            ..candidate(7, Family::Body, 0.0)
        });
        candidates.push(ScanCandidate {
            is_outline: true,
            ..candidate(8, Family::Head, 0.0)
        });

        let faulted = HashSet::from([SurfaceId(4)]);
        let order: Vec<u32> = plan_order(&candidates, &faulted)
            .iter()
            .map(|c| c.surface.0)
            .collect();
        assert_eq!(order, vec![1, 3, 5, 2, 0, 6]);

        // Input order does not matter
        candidates.reverse();
        let again: Vec<u32> = plan_order(&candidates, &faulted)
            .iter()
            .map(|c| c.surface.0)
            .collect();
        assert_eq!(again, order);
    }

    #[test]
    fn test_start_offsets() {
        assert_eq!(start_offsets(0, 6.0, 0.8), Vec::<f32>::new());
        assert_eq!(start_offsets(1, 6.0, 0.8), vec![0.0]);
        let offsets = start_offsets(3, 6.0, 1.0);
        assert_eq!(offsets, vec![0.0, 2.5, 5.0]);
        // Per-surface longer than the whole run: everything starts together
        assert_eq!(start_offsets(3, 0.5, 1.0), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_task_phases() {
        let mut scan = ScanSequencer::new(settings(1.0, 1.0));
        let mut log: Vec<ScanNotification> = Vec::new();
        assert!(scan.start(10.0, &[candidate(0, Family::Base, 0.0)], &HashSet::new()));

        let visuals = scan.tick(10.2, &mut log);
        assert!(matches!(visuals[..], [(SurfaceId(0), ScanVisual::Highlight { .. })]));
        assert_eq!(scan.run().unwrap().tasks[0].state, ScanState::Scanning);

        let visuals = scan.tick(10.7, &mut log);
        match visuals[..] {
            [(_, ScanVisual::Fade { t })] => assert!(t > 0.0 && t < 1.0),
            ref other => panic!("unexpected visuals {:?}", other),
        }
        assert_eq!(scan.run().unwrap().tasks[0].state, ScanState::Transitioning);

        let visuals = scan.tick(11.0, &mut log);
        assert_eq!(visuals, vec![(SurfaceId(0), ScanVisual::Final)]);
        assert!(!scan.is_active());
        assert_eq!(
            log,
            vec![
                ScanNotification::SurfaceStarted {
                    surface: SurfaceId(0),
                    index: 1,
                    total: 1
                },
                ScanNotification::Complete
            ]
        );
    }

    #[test]
    fn test_start_while_active_is_rejected() {
        let mut scan = ScanSequencer::new(settings(2.0, 0.5));
        let candidates = [candidate(0, Family::Base, 0.0), candidate(1, Family::Body, 0.1)];
        assert!(scan.start(0.0, &candidates, &HashSet::new()));
        let before = scan.run().cloned();
        assert!(!scan.start(0.5, &candidates[..1], &HashSet::new()));
        assert_eq!(scan.run().cloned(), before);
    }

    #[test]
    fn test_cancel_clears_run() {
        let mut scan = ScanSequencer::new(settings(2.0, 0.5));
        let mut log: Vec<ScanNotification> = Vec::new();
        scan.start(0.0, &[candidate(0, Family::Base, 0.0)], &HashSet::new());
        scan.tick(0.1, &mut log);
        assert!(scan.cancel());
        assert!(!scan.is_active());
        assert!(scan.tick(5.0, &mut log).is_empty());
        assert!(!log.contains(&ScanNotification::Complete));
        assert!(!scan.cancel());
    }

    #[test]
    fn test_empty_run_completes_on_first_tick() {
        let mut scan = ScanSequencer::new(ScanSettings::default());
        let mut log: Vec<ScanNotification> = Vec::new();
        let shell_only = [ScanCandidate {
            class: SurfaceClass::Shell,
            ..candidate(0, Family::Body, 0.0)
        }];
        assert!(scan.start(3.0, &shell_only, &HashSet::new()));
        assert!(scan.tick(3.0, &mut log).is_empty());
        assert_eq!(log, vec![ScanNotification::Complete]);
        assert!(!scan.is_active());
    }

    #[test]
    fn test_completion_waits_for_every_surface_and_the_clock() {
        let mut scan = ScanSequencer::new(settings(3.0, 1.0));
        let mut log: Vec<ScanNotification> = Vec::new();
        let candidates: Vec<ScanCandidate> =
            (0..3).map(|i| candidate(i, Family::Body, i as f32)).collect();
        scan.start(0.0, &candidates, &HashSet::new());

        // Offsets are 0, 1, 2; the run ends at 3
        for now in [0.0, 0.5, 1.2, 1.99, 2.5, 2.999] {
            scan.tick(now, &mut log);
            assert!(!log.contains(&ScanNotification::Complete), "completed early at {}", now);
            assert!(scan.is_active());
        }
        assert_eq!(scan.run().unwrap().scanned_count, 2);

        scan.tick(3.0, &mut log);
        assert_eq!(log.last(), Some(&ScanNotification::Complete));
        assert_eq!(log.iter().filter(|n| **n == ScanNotification::Complete).count(), 1);
        assert!(!scan.is_active());
    }

    #[test]
    fn test_large_step_still_notifies_in_order() {
        let mut scan = ScanSequencer::new(settings(3.0, 1.0));
        let mut log: Vec<ScanNotification> = Vec::new();
        let candidates: Vec<ScanCandidate> =
            (0..3).map(|i| candidate(i, Family::Body, i as f32)).collect();
        scan.start(0.0, &candidates, &HashSet::new());

        let visuals = scan.tick(10.0, &mut log);
        assert_eq!(visuals.len(), 3);
        assert!(visuals.iter().all(|(_, v)| *v == ScanVisual::Final));
        let indices: Vec<usize> = log
            .iter()
            .filter_map(|n| match n {
                ScanNotification::SurfaceStarted { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(log.last(), Some(&ScanNotification::Complete));
    }

    #[test]
    fn test_two_families_of_five_notify_in_order() {
        let mut scan = ScanSequencer::new(settings(6.0, 0.8));
        let mut log: Vec<ScanNotification> = Vec::new();
        // Interleave ids and heights so input order is not the answer
        let candidates: Vec<ScanCandidate> = (0..10)
            .map(|i| {
                let family = if i % 2 == 0 { Family::Head } else { Family::Base };
                candidate(i, family, (10 - i) as f32 * 0.01)
            })
            .collect();
        scan.start(0.0, &candidates, &HashSet::new());

        let mut now = 0.0;
        while scan.is_active() && now < 20.0 {
            scan.tick(now, &mut log);
            now += 1.0 / 60.0;
        }
        assert!(!scan.is_active());

        let started: Vec<(u32, usize, usize)> = log
            .iter()
            .filter_map(|n| match n {
                ScanNotification::SurfaceStarted { surface, index, total } => {
                    Some((surface.0, *index, *total))
                }
                _ => None,
            })
            .collect();
        assert_eq!(started.len(), 10);
        assert!(started.iter().all(|(_, _, total)| *total == 10));
        assert!(started.windows(2).all(|w| w[0].1 < w[1].1));
        assert_eq!(started.first().map(|s| s.1), Some(1));
        assert_eq!(started.last().map(|s| s.1), Some(10));

        // Base surfaces (odd ids) all come before head surfaces (even ids)
        let families: Vec<bool> = started.iter().map(|(id, _, _)| id % 2 == 1).collect();
        assert_eq!(&families[..5], &[true; 5]);
        assert_eq!(&families[5..], &[false; 5]);
        // Bottom to top within a family: higher ids sit lower
        assert_eq!(started[0].0, 9);
        assert_eq!(started[5].0, 8);
        assert_eq!(log.last(), Some(&ScanNotification::Complete));
    }
}
