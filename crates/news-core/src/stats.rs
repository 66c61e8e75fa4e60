//! Per-country democracy / freedom / press-freedom scores.

use serde::Serialize;

/// Score reported when a country has no articles, and the stand-in for a missing average.
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Raw aggregates for one country, as read from storage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreInputs {
    pub total: i64,
    pub fake: i64,
    pub manipulation: i64,
    pub avg_bias: Option<f64>,
    pub avg_credibility: Option<f64>,
    pub positive: i64,
    pub negative: i64,
    pub neutral: i64,
}

impl ScoreInputs {
    fn credibility(&self) -> f64 {
        clamp_score(self.avg_credibility.unwrap_or(NEUTRAL_SCORE))
    }

    fn inverse_bias(&self) -> f64 {
        100.0 - clamp_score(self.avg_bias.unwrap_or(NEUTRAL_SCORE))
    }

    fn ratio(&self, count: i64) -> f64 {
        (count as f64 / self.total.max(1) as f64).clamp(0.0, 1.0)
    }

    fn fake_ratio(&self) -> f64 {
        self.ratio(self.fake)
    }

    fn manipulation_ratio(&self) -> f64 {
        self.ratio(self.manipulation)
    }
}

fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        return NEUTRAL_SCORE;
    }
    value.clamp(0.0, 100.0)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn finish(score: f64) -> f64 {
    round1(clamp_score(score))
}

pub fn democracy_score(inputs: &ScoreInputs) -> f64 {
    if inputs.total == 0 {
        return NEUTRAL_SCORE;
    }
    finish(
        inputs.credibility() * 0.4
            + inputs.inverse_bias() * 0.3
            + (1.0 - inputs.fake_ratio()) * 100.0 * 0.3,
    )
}

pub fn freedom_score(inputs: &ScoreInputs) -> f64 {
    if inputs.total == 0 {
        return NEUTRAL_SCORE;
    }
    finish(inputs.credibility() * 0.6 + (1.0 - inputs.manipulation_ratio()) * 100.0 * 0.4)
}

pub fn press_freedom_score(inputs: &ScoreInputs) -> f64 {
    if inputs.total == 0 {
        return NEUTRAL_SCORE;
    }
    finish(inputs.inverse_bias() * 0.5 + (1.0 - inputs.fake_ratio()) * 100.0 * 0.5)
}

/// Statistics block returned by `/analyze`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CountryStatistics {
    pub total_news: i64,
    pub fake_news: i64,
    pub manipulation_count: i64,
    pub avg_bias: f64,
    pub avg_credibility: f64,
    pub positive_count: i64,
    pub negative_count: i64,
    pub neutral_count: i64,
    pub democracy_score: f64,
    pub freedom_score: f64,
    pub press_freedom_score: f64,
}

impl From<&ScoreInputs> for CountryStatistics {
    fn from(inputs: &ScoreInputs) -> Self {
        Self {
            total_news: inputs.total,
            fake_news: inputs.fake,
            manipulation_count: inputs.manipulation,
            avg_bias: round1(inputs.avg_bias.unwrap_or(0.0)),
            avg_credibility: round1(inputs.avg_credibility.unwrap_or(0.0)),
            positive_count: inputs.positive,
            negative_count: inputs.negative,
            neutral_count: inputs.neutral,
            democracy_score: democracy_score(inputs),
            freedom_score: freedom_score(inputs),
            press_freedom_score: press_freedom_score(inputs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(total: i64, credibility: f64, bias: f64) -> ScoreInputs {
        ScoreInputs {
            total,
            avg_bias: Some(bias),
            avg_credibility: Some(credibility),
            ..ScoreInputs::default()
        }
    }

    #[test]
    fn empty_country_scores_neutral() {
        let empty = ScoreInputs {
            fake: 3,
            avg_bias: Some(99.0),
            ..ScoreInputs::default()
        };
        assert_eq!(democracy_score(&empty), 50.0);
        assert_eq!(freedom_score(&empty), 50.0);
        assert_eq!(press_freedom_score(&empty), 50.0);
    }

    #[test]
    fn reference_weights() {
        let i = inputs(10, 80.0, 20.0);
        assert_eq!(democracy_score(&i), 86.0);
        assert_eq!(freedom_score(&i), 88.0);
        assert_eq!(press_freedom_score(&i), 90.0);
    }

    #[test]
    fn ratios_lower_scores() {
        let i = ScoreInputs {
            fake: 5,
            manipulation: 2,
            ..inputs(10, 80.0, 20.0)
        };
        // 32 + 24 + 15
        assert_eq!(democracy_score(&i), 71.0);
        // 48 + 32
        assert_eq!(freedom_score(&i), 80.0);
        // 40 + 25
        assert_eq!(press_freedom_score(&i), 65.0);
    }

    #[test]
    fn missing_averages_default_to_fifty() {
        let i = ScoreInputs {
            total: 4,
            ..ScoreInputs::default()
        };
        assert_eq!(democracy_score(&i), 65.0);
        assert_eq!(freedom_score(&i), 70.0);
        assert_eq!(press_freedom_score(&i), 75.0);
    }

    #[test]
    fn corrupt_scores_stay_in_range() {
        for (credibility, bias) in [(150.0, 20.0), (-40.0, 300.0), (f64::NAN, -10.0), (1e9, -1e9)] {
            let i = inputs(3, credibility, bias);
            for score in [democracy_score(&i), freedom_score(&i), press_freedom_score(&i)] {
                assert!((0.0..=100.0).contains(&score), "{score} out of range");
            }
        }
        let over = ScoreInputs {
            fake: 9,
            ..inputs(3, 80.0, 20.0)
        };
        assert!(democracy_score(&over) >= 0.0);
    }

    #[test]
    fn rounds_to_one_decimal() {
        let i = inputs(3, 77.77, 33.33);
        // 31.108 + 20.001 + 30
        assert_eq!(democracy_score(&i), 81.1);
    }

    #[test]
    fn statistics_serialize_camel_case() {
        let stats = CountryStatistics::from(&ScoreInputs {
            total: 3,
            neutral: 3,
            avg_bias: Some(50.0),
            avg_credibility: Some(70.0),
            ..ScoreInputs::default()
        });
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["neutralCount"], 3);
        assert_eq!(json["avgBias"], 50.0);
        assert_eq!(json["avgCredibility"], 70.0);
        assert_eq!(json["pressFreedomScore"], 75.0);
        assert!(json.get("democracyScore").is_some());
    }
}
