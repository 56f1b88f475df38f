use anyhow::Result;

use crate::model::Stage;

pub struct StagesCommand;

impl StagesCommand {
    pub fn render() -> String {
        let mut out = String::new();
        for (position, stage) in Stage::ALL.iter().enumerate() {
            let fan_out = if *stage == Stage::PartiallyDecrypted {
                "  (+ trustee notification)"
            } else {
                ""
            };
            out.push_str(&format!(
                "{}. {:?} <- {}{}\n",
                position + 1,
                stage,
                stage.step_name(),
                fan_out
            ));
        }
        out
    }

    pub fn execute(&self) -> Result<()> {
        print!("{}", Self::render());
        Ok(())
    }
}
