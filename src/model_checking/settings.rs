use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::errors::{ModelCheckingError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundedReachabilityTechnique {
    Imca,
    UnifPlus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LraMethod {
    LinearProgramming,
    ValueIteration,
    /// Known to the configuration layer but not implemented for Markov
    /// automata; selecting it fails at dispatch time.
    LinearEquations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinMaxMethod {
    ValueIteration,
    IntervalIteration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub precision: f64,
    pub relative_precision: bool,
    pub bounded_reachability_technique: BoundedReachabilityTechnique,
    pub lra_method: LraMethod,
    pub min_max_method: MinMaxMethod,
    pub max_iterations: u64,
    pub unif_plus_kappa: f64,
    pub unif_plus_max_rounds: u32,
    pub unif_plus_stall_tolerance: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            precision: 1e-6,
            relative_precision: false,
            bounded_reachability_technique: BoundedReachabilityTechnique::Imca,
            lra_method: LraMethod::LinearProgramming,
            min_max_method: MinMaxMethod::ValueIteration,
            max_iterations: 1_000_000,
            unif_plus_kappa: 0.1,
            unif_plus_max_rounds: 32,
            unif_plus_stall_tolerance: 1e-9,
        }
    }
}

impl Settings {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Settings> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let settings: Settings = serde_json::from_reader(reader)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_str(s: &str) -> Result<Settings> {
        let settings: Settings = serde_json::from_str(s)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.precision > 0.0) {
            return Err(ModelCheckingError::InvalidSettings(format!(
                "precision must be positive, got {}",
                self.precision
            )));
        }
        if !(self.unif_plus_kappa > 0.0 && self.unif_plus_kappa < 1.0) {
            return Err(ModelCheckingError::InvalidSettings(format!(
                "kappa must lie strictly between 0 and 1, got {}",
                self.unif_plus_kappa
            )));
        }
        if self.max_iterations == 0 || self.unif_plus_max_rounds == 0 {
            return Err(ModelCheckingError::InvalidSettings(
                "iteration limits must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_precision(mut self, precision: f64) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_technique(mut self, technique: BoundedReachabilityTechnique) -> Self {
        self.bounded_reachability_technique = technique;
        self
    }

    pub fn with_lra_method(mut self, method: LraMethod) -> Self {
        self.lra_method = method;
        self
    }

    pub fn with_min_max_method(mut self, method: MinMaxMethod) -> Self {
        self.min_max_method = method;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let settings = Settings::from_json_str(
            r#"{"precision": 1e-4, "bounded_reachability_technique": "UnifPlus"}"#,
        )
        .unwrap();
        assert_eq!(settings.precision, 1e-4);
        assert_eq!(settings.bounded_reachability_technique, BoundedReachabilityTechnique::UnifPlus);
        assert_eq!(settings.lra_method, LraMethod::LinearProgramming);
        assert_eq!(settings.unif_plus_kappa, 0.1);
    }

    #[test]
    fn rejects_bad_kappa() {
        let result = Settings::from_json_str(r#"{"unif_plus_kappa": 1.5}"#);
        assert!(matches!(result, Err(ModelCheckingError::InvalidSettings(_))));
    }

    #[test]
    fn rejects_unknown_method_name() {
        let result = Settings::from_json_str(r#"{"lra_method": "Simplex"}"#);
        assert!(matches!(result, Err(ModelCheckingError::Json(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = Settings::from_json_file("does/not/exist.json");
        assert!(matches!(result, Err(ModelCheckingError::Io(_))));
    }
}
