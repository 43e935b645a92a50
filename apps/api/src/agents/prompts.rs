// Prompt templates for oracle interactions
//
// Every call site that consults the reasoning oracle renders one of these
// templates. Prompts are versioned so recorded activity can be traced back
// to the exact wording that produced a decision.

use std::collections::HashMap;

use super::types::AgentRole;

/// Prompt template structure
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub name: String,
    pub version: String,
    pub system: String,
    pub user_template: String,
}

impl PromptTemplate {
    /// Render the user template, replacing `{{name}}` with its variable
    ///
    /// Unknown placeholders are left untouched.
    ///
    /// # Example
    /// ```
    /// use std::collections::HashMap;
    /// use crewline_api::agents::prompts::library;
    ///
    /// let mut vars = HashMap::new();
    /// vars.insert("goal".to_string(), "Ship it".to_string());
    /// assert!(library::goal_analysis().render(&vars).contains("Ship it"));
    /// ```
    pub fn render(&self, variables: &HashMap<String, String>) -> String {
        let mut body = self.user_template.clone();
        for (name, value) in variables {
            body = body.replace(&format!("{{{{{name}}}}}"), value);
        }

        if self.system.is_empty() {
            body
        } else {
            format!("{}\n\n{}", self.system, body)
        }
    }

    /// Convenience for templates with a handful of variables
    pub fn render_with(&self, variables: &[(&str, String)]) -> String {
        let map = variables
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        self.render(&map)
    }
}

/// System prompt for a worker of the given role
pub fn worker_system_prompt(role: AgentRole, capabilities: &[String]) -> String {
    let base = format!(
        "You are a specialized {} Agent in an autonomous team.\n\
         Your capabilities include: {}.\n\n\
         Key Principles:\n\
         1. Work autonomously and take initiative\n\
         2. Communicate clearly with other agents\n\
         3. Ask for help when needed, but try to solve problems independently first\n\
         4. Document your decisions and progress\n\
         5. Focus on delivering high-quality, actionable results\n\n\
         You are part of a team working to achieve complex goals.\n\
         Coordinate with other agents through shared state and messaging.",
        role.title(),
        capabilities.join(", ")
    );

    let specific = match role {
        AgentRole::Research => {
            "\n\nAs a Research Agent:\n\
             - Find accurate, up-to-date information from reliable sources\n\
             - Verify facts and cite sources properly\n\
             - Synthesize information into clear insights"
        }
        AgentRole::Code => {
            "\n\nAs a Code Agent:\n\
             - Write clean, efficient, and well-documented code\n\
             - Test your code thoroughly\n\
             - Consider scalability and maintainability"
        }
        AgentRole::ToolBuilder => {
            "\n\nAs a Tool Builder Agent:\n\
             - Design tools that are reusable and robust\n\
             - Test tools thoroughly before deployment\n\
             - Document tool usage and interfaces"
        }
        _ => "",
    };

    base + specific
}

pub mod library {
    use super::PromptTemplate;

    fn template(name: &str, system: &str, user_template: &str) -> PromptTemplate {
        PromptTemplate {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            system: system.to_string(),
            user_template: user_template.to_string(),
        }
    }

    pub fn goal_analysis() -> PromptTemplate {
        template(
            "goal_analysis",
            "You are a highly skilled project manager analyzing project goals. \
             Respond with a single JSON object and nothing else.",
            "Task: \"{{goal}}\"\n\n\
             Return JSON with:\n\
             - primary_goal: Main objective\n\
             - required_capabilities: List of needed capabilities (research, coding, writing, design, analysis, qa)\n\
             - complexity_level: simple, moderate, complex\n\
             - estimated_scope: small, medium, large\n\
             - key_deliverables: List of expected outputs\n\
             - constraints: Any limitations or requirements",
        )
    }

    pub fn phase_decomposition() -> PromptTemplate {
        template(
            "phase_decomposition",
            "You are breaking down a goal into concrete, executable phases. \
             Respond with a JSON array and nothing else.",
            "Requirements: {{requirements}}\n\n\
             Break the task down into 3-10 executable phases. For each phase provide:\n\
             - phase_name: Clear, descriptive name (unique)\n\
             - description: What this phase accomplishes\n\
             - required_role: One of research, code, writer, designer, analyst, qa, tool_builder\n\
             - estimated_duration: Time in minutes\n\
             - dependencies: List of phase names this depends on\n\
             - parallel_possible: Can this run in parallel with other phases?\n\
             - deliverables: Identifiers of the outputs this phase produces",
        )
    }

    pub fn phase_execution() -> PromptTemplate {
        template(
            "phase_execution",
            "",
            "{{system_prompt}}\n\n\
             Phase: {{phase}}\n\
             Description: {{description}}\n\
             Expected deliverables: {{deliverables}}\n\
             {{guidance}}\n\n\
             Carry out the phase and return a JSON object describing the result. \
             If shell commands must run in your workspace, list them in order \
             under a \"commands\" array.",
        )
    }

    pub fn severity_classification() -> PromptTemplate {
        template(
            "severity_classification",
            "You classify the severity of errors raised by autonomous agents. \
             Respond with a single JSON object and nothing else.",
            "Error Message: {{message}}\n\
             Error Type: {{error_type}}\n\n\
             Classify as:\n\
             - low: Minor issue, won't significantly impact task completion\n\
             - medium: Significant issue but task can likely continue\n\
             - high: Major issue that may prevent task completion\n\
             - critical: Critical error that stops all progress\n\n\
             Return {\"severity\": \"<level>\"}.",
        )
    }

    pub fn strategy_selection() -> PromptTemplate {
        template(
            "strategy_selection",
            "You choose recovery strategies for failing autonomous agents. \
             Respond with a single JSON object and nothing else.",
            "Error: {{message}}\n\
             Type: {{error_type}}\n\
             Severity: {{severity}}\n\
             Agent Role: {{role}}\n\
             Attempt Count: {{attempt}}\n\
             Previously tried: {{tried}}\n\
             Context: {{context}}\n\n\
             Available Strategies:\n\
             - retry: Try the same action again\n\
             - alternative_approach: Use a different method to achieve the same goal\n\
             - simplify_task: Break down the task into smaller, simpler steps\n\
             - request_help: Ask other agents for assistance\n\
             - restart_worker: Restart the agent with fresh state\n\
             - use_different_tool: Try using a different tool or library\n\
             - escalate_to_user: Hand the problem to a human operator\n\n\
             Return {\"strategy\": \"<name>\"}.",
        )
    }

    pub fn alternative_approach() -> PromptTemplate {
        template(
            "alternative_approach",
            "Respond with a single JSON object and nothing else.",
            "An agent encountered this error:\n{{message}}\n\n\
             Context: {{context}}\n\n\
             Suggest an alternative approach to achieve the same goal. Return JSON with:\n\
             - approach_description: Clear description of the alternative\n\
             - steps: List of specific steps to take\n\
             - tools_needed: Any different tools required",
        )
    }

    pub fn simplify_task() -> PromptTemplate {
        template(
            "simplify_task",
            "Respond with a JSON array and nothing else.",
            "This task failed with error: {{message}}\n\n\
             Original task context: {{context}}\n\n\
             Break this down into 2-3 simpler, more manageable subtasks. Each entry has:\n\
             - description: What the subtask accomplishes\n\
             - steps: How to accomplish it\n\
             - dependencies: What it depends on",
        )
    }

    pub fn use_different_tool() -> PromptTemplate {
        template(
            "use_different_tool",
            "Respond with a single JSON object and nothing else.",
            "An agent's tool failed with this error:\n{{message}}\n\n\
             Context: {{context}}\n\n\
             Suggest alternative tools or approaches. Return JSON with:\n\
             - alternatives: List of alternative tools/approaches\n\
             - recommendations: Which alternatives are most promising\n\
             - implementation_needed: If any alternatives need to be built",
        )
    }

    pub fn helper_role() -> PromptTemplate {
        template(
            "helper_role",
            "Respond with a single JSON object and nothing else.",
            "An agent needs help with this error:\n{{message}}\n\n\
             Agent Role: {{role}}\n\
             Context: {{context}}\n\n\
             Which other agent role would be most helpful to assist?\n\
             Choose from: research, code, writer, designer, analyst, qa, tool_builder.\n\
             Return {\"role\": \"<name>\"}.",
        )
    }

    pub fn result_synthesis() -> PromptTemplate {
        template(
            "result_synthesis",
            "Respond with a single JSON object and nothing else.",
            "Synthesize these phase results into a comprehensive final output:\n\n\
             Results: {{results}}\n\n\
             Create:\n\
             1. executive_summary: what was accomplished\n\
             2. deliverables: key deliverables and artifacts\n\
             3. insights: insights and recommendations\n\
             4. next_steps: follow-up actions",
        )
    }
}
