//! Decision request builder

use std::fmt::Write as _;

use crate::domain::PriceQuote;
use crate::indicators::IndicatorSet;
use crate::portfolio::Portfolio;

/// System message sent ahead of every decision prompt
pub const SYSTEM_PROMPT: &str = "You are a professional cryptocurrency trader. Output JSON format only.";

/// Strategy used when a model has none configured
pub const DEFAULT_STRATEGY: &str = r#"You are a professional cryptocurrency trader. Analyze the market and make trading decisions.

TRADING RULES:
1. Signals: buy_to_enter (long), sell_to_enter (short), close_position, hold
2. Risk Management:
   - Max 3 positions
   - Risk 1-5% per trade
   - Use appropriate leverage (1-20x)
3. Position Sizing:
   - Conservative: 1-2% risk
   - Moderate: 2-4% risk
   - Aggressive: 4-5% risk
4. Exit Strategy:
   - Close losing positions quickly
   - Let winners run
   - Use technical indicators"#;

const OUTPUT_FORMAT: &str = r#"OUTPUT FORMAT (JSON only):
```json
{
  "COIN": {
    "signal": "buy_to_enter|sell_to_enter|hold|close_position",
    "quantity": 0.5,
    "leverage": 10,
    "profit_target": 45000.0,
    "stop_loss": 42000.0,
    "confidence": 0.75,
    "reasoning": {
      "market_analysis": "Detailed market trend analysis",
      "technical_signals": "Key technical indicators analysis",
      "risk_assessment": "Risk evaluation",
      "decision_rationale": "Why this decision was made"
    },
    "justification": "Brief summary"
  }
}
```

Provide detailed reasoning for each decision. Analyze and output JSON only."#;

/// Market state for one coin at decision time
#[derive(Debug, Clone)]
pub struct CoinMarket {
    pub quote: PriceQuote,
    pub indicators: IndicatorSet,
}

/// Messages sent to the completion endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Assembles the prompt from market state, account state and strategy text
#[derive(Debug, Clone)]
pub struct DecisionRequestBuilder {
    strategy: String,
    max_leverage: u32,
}

impl DecisionRequestBuilder {
    pub fn new(strategy: &str, max_leverage: u32) -> Self {
        let strategy = if strategy.trim().is_empty() {
            DEFAULT_STRATEGY.to_string()
        } else {
            strategy.trim().to_string()
        };
        Self {
            strategy,
            max_leverage,
        }
    }

    pub fn build(&self, markets: &[CoinMarket], portfolio: &Portfolio) -> Prompt {
        let mut user = String::with_capacity(2048);
        let _ = writeln!(user, "{}\n", self.strategy);

        user.push_str("MARKET DATA:\n");
        for market in markets {
            let q = &market.quote;
            let _ = writeln!(user, "{}: ${:.2} ({:+.2}%)", q.coin, q.price, q.change_24h);
            let entries = market.indicators.entries();
            if !entries.is_empty() {
                let line = entries
                    .iter()
                    .filter(|(name, _)| name != "price")
                    .map(|(name, value)| format!("{}={:.4}", name.to_uppercase(), value))
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = writeln!(user, "  {}", line);
            }
        }

        let _ = write!(
            user,
            "\nACCOUNT STATUS:\n\
             - Initial Capital: ${:.2}\n\
             - Total Value: ${:.2}\n\
             - Cash: ${:.2}\n\
             - Total Return: {:.2}%\n\
             - Max Leverage: {}x\n",
            portfolio.initial_capital,
            portfolio.total_value(),
            portfolio.cash,
            portfolio.total_return_pct(),
            self.max_leverage,
        );

        user.push_str("\nCURRENT POSITIONS:\n");
        if portfolio.positions.is_empty() {
            user.push_str("None\n");
        } else {
            for pos in portfolio.positions.values() {
                let _ = write!(
                    user,
                    "- {} {}: {:.4} @ ${:.2} ({}x)",
                    pos.coin, pos.side, pos.quantity, pos.avg_entry, pos.leverage
                );
                if let Some(stop) = pos.stop_loss {
                    let _ = write!(user, " SL ${:.2}", stop);
                }
                if let Some(target) = pos.take_profit {
                    let _ = write!(user, " TP ${:.2}", target);
                }
                user.push('\n');
            }
        }

        user.push('\n');
        user.push_str(OUTPUT_FORMAT);

        Prompt {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::Windowed;
    use crate::portfolio::Portfolio;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_prompt_lists_market_and_account() {
        let builder = DecisionRequestBuilder::new("", 20);
        let mut quote = PriceQuote::new("BTC", dec!(50000), Utc::now());
        quote.change_24h = dec!(-1.25);
        let markets = vec![CoinMarket {
            quote,
            indicators: IndicatorSet {
                rsi: Some(Windowed::new(14, 55.0)),
                ..Default::default()
            },
        }];
        let portfolio = Portfolio::new(1, dec!(10000));

        let prompt = builder.build(&markets, &portfolio);
        assert_eq!(prompt.system, SYSTEM_PROMPT);
        assert!(prompt.user.starts_with("You are a professional"));
        assert!(prompt.user.contains("BTC: $50000.00 (-1.25%)"));
        assert!(prompt.user.contains("RSI_14=55.0000"));
        assert!(prompt.user.contains("Initial Capital: $10000.00"));
        assert!(prompt.user.contains("CURRENT POSITIONS:\nNone"));
    }

    #[test]
    fn test_custom_strategy_replaces_default() {
        let builder = DecisionRequestBuilder::new("Only trade ETH.", 5);
        let prompt = builder.build(&[], &Portfolio::new(1, dec!(100)));
        assert!(prompt.user.starts_with("Only trade ETH."));
        assert!(prompt.user.contains("Max Leverage: 5x"));
    }
}
