// Scheduling vocabulary shared between the appointment and queue cells.
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConsultationMode {
    #[serde(rename = "Online", alias = "online", alias = "remote")]
    Online,
    #[serde(rename = "In-Person", alias = "in_person", alias = "in-person")]
    InPerson,
}

impl fmt::Display for ConsultationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsultationMode::Online => write!(f, "Online"),
            ConsultationMode::InPerson => write!(f, "In-Person"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentType {
    #[default]
    Consultation,
    #[serde(alias = "FOLLOW_UP")]
    Followup,
    Checkup,
    Emergency,
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentType::Consultation => write!(f, "CONSULTATION"),
            AppointmentType::Followup => write!(f, "FOLLOWUP"),
            AppointmentType::Checkup => write!(f, "CHECKUP"),
            AppointmentType::Emergency => write!(f, "EMERGENCY"),
        }
    }
}
