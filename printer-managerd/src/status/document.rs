use serde::Deserialize;

/// The subset of `GET /printer` the manager reads
#[derive(Debug, Deserialize)]
pub struct PrinterDocument {
    pub bed: Bed,
    #[serde(default)]
    pub heads: Vec<Head>,
}

#[derive(Debug, Deserialize)]
pub struct Bed {
    pub temperature: Temperature,
}

#[derive(Debug, Deserialize)]
pub struct Head {
    #[serde(default)]
    pub extruders: Vec<Extruder>,
}

#[derive(Debug, Deserialize)]
pub struct Extruder {
    pub hotend: Hotend,
}

#[derive(Debug, Deserialize)]
pub struct Hotend {
    pub temperature: Temperature,
}

#[derive(Debug, Deserialize)]
pub struct Temperature {
    pub current: f64,
}

/// `GET /print_job/progress`
#[derive(Debug, Deserialize)]
pub struct ProgressDocument {
    pub progress: f64,
}
