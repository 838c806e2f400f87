// src/models/mod.rs

pub mod answer;
pub mod attempt;
pub mod exam;
pub mod report;
pub mod score;
pub mod user;
