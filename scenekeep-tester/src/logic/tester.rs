use colored::Colorize;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use scenekeep_engine::SceneCatalog;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::harness::Harness;
use super::scenarios::Scenario;
use super::seeds::SeedInfo;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_name: String,
    pub seed: u64,
    pub passed: bool,
    pub iterations_run: usize,
    pub successful_iterations: usize,
    pub reloads: usize,
    pub refused_events: usize,
    pub failures: Vec<String>,
    #[serde(with = "duration_serde")]
    pub average_duration: Duration,
    #[serde(with = "duration_vec_serde")]
    pub performance_data: Vec<Duration>,
}

#[derive(Debug, Default)]
struct IterationTotals {
    successes: usize,
    reloads: usize,
    refused: usize,
    failures: Vec<String>,
    performance_data: Vec<Duration>,
}

pub struct LogicTester {
    catalog: SceneCatalog,
    verbose: bool,
}

impl LogicTester {
    pub const fn new(catalog: SceneCatalog, verbose: bool) -> Self {
        Self { catalog, verbose }
    }

    pub fn run_scenario(
        &self,
        scenario: &Scenario,
        seeds: &[SeedInfo],
        iterations: usize,
    ) -> Vec<ScenarioResult> {
        let mut results = Vec::new();

        for seed in seeds {
            if self.verbose {
                let label = seed.label.as_deref().unwrap_or("-");
                println!(
                    "🧪 Testing scenario: {} (seed: {} word: {})",
                    scenario.name.bright_white(),
                    seed.seed,
                    label
                );
            }
            results.push(self.run_single_scenario(scenario, seed.seed, iterations));
        }

        results
    }

    fn run_single_scenario(
        &self,
        scenario: &Scenario,
        seed: u64,
        iterations: usize,
    ) -> ScenarioResult {
        let totals = self.run_iterations(scenario, seed, iterations);

        let average_duration = if totals.performance_data.is_empty() {
            Duration::ZERO
        } else {
            totals.performance_data.iter().sum::<Duration>()
                / u32::try_from(totals.performance_data.len()).unwrap_or(1)
        };

        ScenarioResult {
            scenario_name: scenario.name.to_string(),
            seed,
            passed: totals.failures.is_empty(),
            iterations_run: iterations,
            successful_iterations: totals.successes,
            reloads: totals.reloads,
            refused_events: totals.refused,
            failures: totals.failures,
            average_duration,
            performance_data: totals.performance_data,
        }
    }

    fn run_iterations(&self, scenario: &Scenario, seed: u64, iterations: usize) -> IterationTotals {
        let mut totals = IterationTotals::default();

        for i in 0..iterations {
            let start_time = Instant::now();
            let iteration_seed = seed.wrapping_add(u64::try_from(i).unwrap_or(u64::MAX));
            let mut rng = ChaCha8Rng::seed_from_u64(iteration_seed);
            let scene = scenario.scenes[rng.gen_range(0..scenario.scenes.len())];

            let definition = match self.catalog.require(scene) {
                Ok(definition) => definition.clone(),
                Err(err) => {
                    totals.failures.push(format!("Iteration {}: {err}", i + 1));
                    continue;
                }
            };
            let mut harness = match Harness::start(definition) {
                Ok(harness) => harness,
                Err(err) => {
                    totals
                        .failures
                        .push(format!("Iteration {} (scene {scene}): {err:#}", i + 1));
                    continue;
                }
            };

            let outcome = (scenario.run)(&mut harness, &mut rng);
            totals.reloads += harness.reloads();
            totals.refused += harness.refused();

            match outcome {
                Ok(()) => {
                    totals.successes += 1;
                    let duration = start_time.elapsed();
                    totals.performance_data.push(duration);
                    if self.verbose {
                        println!(
                            "  ✅ Iteration {}/{} passed ({duration:?}) scene:{} reloads:{}",
                            i + 1,
                            iterations,
                            scene,
                            harness.reloads()
                        );
                    }
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    let phase = harness.phase().unwrap_or("-").to_string();
                    totals.failures.push(format!(
                        "Iteration {} (scene {}, seed {}, t={}ms, reloads {}, phase {}): {}",
                        i + 1,
                        scene,
                        iteration_seed,
                        harness.now(),
                        harness.reloads(),
                        phase,
                        message
                    ));
                    if self.verbose {
                        println!(
                            "  ❌ Iteration {}/{} failed: {}",
                            i + 1,
                            iterations,
                            message.red()
                        );
                    }
                }
            }
        }

        totals
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u128::deserialize(deserializer)?;
        Ok(Duration::from_millis(u64::try_from(millis).unwrap_or(0)))
    }
}

mod duration_vec_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(durations: &[Duration], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis: Vec<u128> = durations.iter().map(Duration::as_millis).collect();
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis_vec = Vec::<u128>::deserialize(deserializer)?;
        Ok(millis_vec
            .into_iter()
            .map(|m| Duration::from_millis(u64::try_from(m).unwrap_or(0)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::scenarios::get_scenario;

    fn tester() -> LogicTester {
        LogicTester::new(SceneCatalog::builtin().unwrap(), false)
    }

    #[test]
    fn runs_one_result_per_seed() {
        let scenario = get_scenario("door").unwrap();
        let seeds = [SeedInfo::from_numeric(1), SeedInfo::from_numeric(2)];
        let results = tester().run_scenario(&scenario, &seeds, 3);
        assert_eq!(results.len(), 2);
        for result in &results {
            assert!(result.passed, "{:?}", result.failures);
            assert_eq!(result.successful_iterations, 3);
            assert!(result.reloads >= 3);
        }
    }

    #[test]
    fn result_serializes_durations_as_millis() {
        let result = ScenarioResult {
            scenario_name: "Door Progress".into(),
            seed: 9,
            passed: true,
            iterations_run: 1,
            successful_iterations: 1,
            reloads: 1,
            refused_events: 0,
            failures: Vec::new(),
            average_duration: Duration::from_millis(12),
            performance_data: vec![Duration::from_millis(12)],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["average_duration"], 12);
        assert_eq!(json["performance_data"][0], 12);
        let back: ScenarioResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.average_duration, Duration::from_millis(12));
    }
}
