use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Why an operation ended. Serialized with the tags used in the state file
/// and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "Cooldown")]
    Cooldown,
    #[serde(rename = "Sem Compra (Operação Vazia)")]
    NoPurchase,
    #[serde(rename = "Stop-loss Total")]
    StopLoss,
    #[serde(rename = "Meta de Lucro Total")]
    ProfitTarget,
    #[serde(rename = "Scaling Out Complete")]
    ScaledOut,
    #[serde(rename = "Venda Antecipada Total")]
    EarlyExit,
    #[serde(rename = "Fim dos Dados")]
    DataExhausted,
    #[serde(rename = "Venda Forçada (Tempo Máximo)")]
    TimeLimit,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Cooldown => "Cooldown",
            ExitReason::NoPurchase => "Sem Compra (Operação Vazia)",
            ExitReason::StopLoss => "Stop-loss Total",
            ExitReason::ProfitTarget => "Meta de Lucro Total",
            ExitReason::ScaledOut => "Scaling Out Complete",
            ExitReason::EarlyExit => "Venda Antecipada Total",
            ExitReason::DataExhausted => "Fim dos Dados",
            ExitReason::TimeLimit => "Venda Forçada (Tempo Máximo)",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Bias of the synthetic random walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketTrend {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl MarketTrend {
    /// Uniform draw bounds `(lo, hi)` and the divisor applied to the draw.
    pub fn bounds(&self) -> (f64, f64, f64) {
        match self {
            MarketTrend::Bullish => (-1.0, 1.2, 1000.0),
            MarketTrend::Bearish => (-1.2, 1.0, 1000.0),
            MarketTrend::Neutral => (-1.0, 1.0002, 1000.0),
        }
    }
}

impl fmt::Display for MarketTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketTrend::Bullish => write!(f, "bullish"),
            MarketTrend::Bearish => write!(f, "bearish"),
            MarketTrend::Neutral => write!(f, "neutral"),
        }
    }
}

impl FromStr for MarketTrend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bullish" | "alta" => Ok(MarketTrend::Bullish),
            "bearish" | "baixa" => Ok(MarketTrend::Bearish),
            "neutral" | "neutra" => Ok(MarketTrend::Neutral),
            other => Err(format!("unknown trend '{}'", other)),
        }
    }
}
