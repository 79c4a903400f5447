use crate::error::ConfigError;

/// The discrete green-proportion settings and the signal programs that enact them
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSpace {
    tls_id: String,
    programs: Vec<String>,
}

impl ActionSpace {
    pub fn new(tls_id: String, programs: Vec<String>) -> Result<Self, ConfigError> {
        if programs.is_empty() {
            return Err(ConfigError::invalid(
                "signal.programs",
                "at least one signal program is required",
            ));
        }
        Ok(Self { tls_id, programs })
    }

    /// Programs named by substituting each action index for `{action}` in `template`
    pub fn from_template(
        tls_id: String,
        template: &str,
        num_actions: usize,
    ) -> Result<Self, ConfigError> {
        if num_actions > 1 && !template.contains("{action}") {
            return Err(ConfigError::invalid(
                "signal.program_template",
                format!("`{template}` has no `{{action}}` placeholder"),
            ));
        }
        let programs = (0..num_actions)
            .map(|a| template.replace("{action}", &a.to_string()))
            .collect();
        Self::new(tls_id, programs)
    }

    pub fn tls_id(&self) -> &str {
        &self.tls_id
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn program(&self, action: usize) -> &str {
        &self.programs[action]
    }

    /// Share of the cycle given to green, evenly spaced over `[0, 1]`
    pub fn green_proportion(&self, action: usize) -> f64 {
        match self.programs.len() {
            1 => 1.0,
            n => action as f64 / (n - 1) as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_expansion() {
        let actions = ActionSpace::from_template("traffic_light".into(), "program_{action}", 11).unwrap();
        assert_eq!(actions.len(), 11);
        assert_eq!(actions.program(0), "program_0");
        assert_eq!(actions.program(10), "program_10");
        assert_eq!(actions.green_proportion(5), 0.5);
        assert_eq!(actions.green_proportion(10), 1.0);
    }

    #[test]
    fn degenerate_action_sets() {
        assert!(ActionSpace::new("tl".into(), vec![]).is_err());
        assert!(ActionSpace::from_template("tl".into(), "program_{action}", 0).is_err());
        assert!(ActionSpace::from_template("tl".into(), "fixed", 3).is_err(), "names would collide");
    }
}
