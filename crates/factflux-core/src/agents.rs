//! The two agents that make up a research run.

use std::sync::Arc;

use crate::agent::AgentConfig;
use crate::config::ResearchConfig;
use crate::tools::{DeepResearchTool, ToolSet};

pub const RESEARCH_AGENT: &str = "research_agent";
pub const ELABORATION_AGENT: &str = "elaboration_agent";

/// Instructions for the research agent; the tool parameters come from `[research]`.
pub fn research_instructions(research: &ResearchConfig) -> String {
    let ResearchConfig {
        max_depth,
        time_limit_secs,
        max_urls,
        ..
    } = research;
    format!(
        "You are a research assistant that can perform deep web research on any topic.

When given a research topic or question:
1. Use the deep_research tool to gather comprehensive information.
   Always use these parameters:
   * max_depth: {max_depth} (moderate depth)
   * time_limit: {time_limit_secs} (seconds)
   * max_urls: {max_urls} (sufficient sources)
2. The tool searches the web, analyzes multiple sources and returns a synthesis.
3. Review the research results and organize them into a well-structured markdown report.
4. Include proper citations for all sources.
5. Highlight key findings and insights."
    )
}

pub const ELABORATION_INSTRUCTIONS: &str = "You are an expert content enhancer specializing in research elaboration.

When given a research report:
1. Analyze the structure and content of the report.
2. Enhance the report by:
   - Adding more detailed explanations of complex concepts.
   - Including relevant examples, case studies and real-world applications.
   - Expanding on key points with additional context and nuance.
   - Describing useful visual elements (charts, diagrams, infographics).
   - Incorporating latest trends and future predictions.
   - Suggesting practical implications for different stakeholders.
3. Maintain academic rigor and factual accuracy.
4. Preserve the original structure and section headings while making it more comprehensive.
5. Ensure all additions are relevant and valuable to the topic.";

/// Research agent bound to exactly one tool, `deep_research`.
pub fn research_agent_config(
    tool: Arc<DeepResearchTool>,
    research: &ResearchConfig,
) -> AgentConfig {
    AgentConfig::new(RESEARCH_AGENT, research_instructions(research))
        .with_tools(ToolSet::new().with(tool))
}

/// Elaboration agent: pure rewriting, no tools.
pub fn elaboration_agent_config() -> AgentConfig {
    AgentConfig::new(ELABORATION_AGENT, ELABORATION_INSTRUCTIONS)
}

/// Input handed to the elaboration agent. It only ever sees the report text.
pub fn build_elaboration_input(topic: &str, initial_report: &str) -> String {
    format!(
        "RESEARCH TOPIC: {topic}\n\n\
         INITIAL RESEARCH REPORT:\n{initial_report}\n\n\
         Please enhance this research report with additional information, examples, case studies, \
         and deeper insights while maintaining its academic rigor and factual accuracy."
    )
}
