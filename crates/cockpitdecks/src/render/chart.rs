use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use tracing::trace;

use super::{Color, SeriesFace};
use crate::formula::{Formula, OperatorTable, evaluate};
use crate::variables::VariableStore;

#[derive(Debug)]
struct Series {
    formula: Formula,
    min: f64,
    max: f64,
    color: Color,
    samples: VecDeque<f64>,
}

/// Ring buffers of sampled formula values
#[derive(Debug)]
pub(crate) struct ChartState {
    series: Vec<Series>,
    keep: usize,
    update: Duration,
    last_sample: Option<Instant>,
}

impl ChartState {
    pub(crate) fn new(series: Vec<(Formula, f64, f64, Color)>, keep: usize, update: Duration) -> Self {
        Self {
            series: series
                .into_iter()
                .map(|(formula, min, max, color)| Series {
                    formula,
                    min,
                    max,
                    color,
                    samples: VecDeque::with_capacity(keep),
                })
                .collect(),
            keep,
            update,
            last_sample: None,
        }
    }

    pub(crate) fn variables(&self) -> Vec<String> {
        self.series
            .iter()
            .flat_map(|s| s.formula.variables())
            .map(str::to_string)
            .collect()
    }

    /// Take one sample per series, at most once per update period
    pub(crate) fn sample(&mut self, now: Instant, store: &VariableStore, operators: &OperatorTable) {
        if let Some(last) = self.last_sample
            && now.duration_since(last) < self.update
        {
            return;
        }
        self.last_sample = Some(now);
        for series in &mut self.series {
            match evaluate(&series.formula, store, operators).map(|v| v.as_number()) {
                Ok(Some(value)) => {
                    if series.samples.len() == self.keep {
                        series.samples.pop_front();
                    }
                    series.samples.push_back(value);
                }
                // a gap keeps the previous samples
                Ok(None) | Err(_) => trace!("No sample for {}", series.formula.text()),
            }
        }
    }

    /// Y pixel positions for a face of `height` pixels
    pub(crate) fn faces(&self, height: u32) -> Vec<SeriesFace> {
        let bottom = f64::from(height.saturating_sub(1));
        self.series
            .iter()
            .map(|series| SeriesFace {
                color: series.color,
                points: series
                    .samples
                    .iter()
                    .map(|v| {
                        let fraction = ((v - series.min) / (series.max - series.min)).clamp(0.0, 1.0);
                        ((1.0 - fraction) * bottom).round() as u32
                    })
                    .collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_a_bounded_window_sampled_at_the_update_rate() {
        let store = VariableStore::new();
        let operators = OperatorTable::default();
        let formula = Formula::parse("${sim/airspeed}").unwrap();
        let mut chart = ChartState::new(
            vec![(formula, 0.0, 100.0, Color::WHITE)],
            3,
            Duration::from_secs(1),
        );
        let start = Instant::now();
        for (i, speed) in [0.0, 25.0, 50.0, 75.0, 100.0].into_iter().enumerate() {
            store.set("sim/airspeed", speed);
            chart.sample(start + Duration::from_secs(i as u64), &store, &operators);
            // too soon, ignored
            chart.sample(start + Duration::from_millis(i as u64 * 1000 + 500), &store, &operators);
        }
        let faces = chart.faces(101);
        assert_eq!(faces[0].points, vec![50, 25, 0]);
        assert_eq!(chart.variables(), vec!["sim/airspeed".to_string()]);
    }
}
