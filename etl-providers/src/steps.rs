//! Per-provider step sequences, declared as ordered data rather than
//! inferred at runtime.

use etl_domain::Provider;

/// One step in a provider's ordered extraction sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSpec {
    pub provider: Provider,
    /// Zero-based position; also the `StepState.order` a job tracks
    /// (`etl_queue::job::StepState`).
    pub order: usize,
    pub name: &'static str,
    pub description: &'static str,
    /// Whether this step consumes the results of the previous one (e.g.
    /// dev-status extraction needs the issues step's `issues_with_code_changes`
    /// set) rather than re-querying the provider from scratch.
    pub depends_on_previous: bool,
}

const JIRA_STEPS: [StepSpec; 5] = [
    StepSpec {
        provider: Provider::Jira,
        order: 0,
        name: "jira_projects_and_issue_types",
        description: "discover projects & work-item types",
        depends_on_previous: false,
    },
    StepSpec {
        provider: Provider::Jira,
        order: 1,
        name: "jira_statuses_and_relationships",
        description: "per-project statuses and workflow relationships",
        depends_on_previous: true,
    },
    StepSpec {
        provider: Provider::Jira,
        order: 2,
        name: "jira_issues_with_changelogs",
        description: "issues filtered by projects, base search, and watermark",
        depends_on_previous: true,
    },
    StepSpec {
        provider: Provider::Jira,
        order: 3,
        name: "jira_dev_status",
        description: "per-issue dev-status extraction for issues_with_code_changes",
        depends_on_previous: true,
    },
    StepSpec {
        provider: Provider::Jira,
        order: 4,
        name: "jira_sprint_reports",
        description: "per (board, sprint) metrics for sprints seen or touched since the watermark",
        depends_on_previous: true,
    },
];

/// GitHub's sequence follows the same discover -> detail -> relation shape
/// Jira uses (repos first, since issues and PRs both key off a repository).
const GITHUB_STEPS: [StepSpec; 4] = [
    StepSpec {
        provider: Provider::Github,
        order: 0,
        name: "github_repos",
        description: "discover repositories in scope",
        depends_on_previous: false,
    },
    StepSpec {
        provider: Provider::Github,
        order: 1,
        name: "github_issues_and_labels",
        description: "issues filtered by repos and watermark, with labels",
        depends_on_previous: true,
    },
    StepSpec {
        provider: Provider::Github,
        order: 2,
        name: "github_pull_requests_with_reviews",
        description: "pull requests and their reviews since the watermark",
        depends_on_previous: true,
    },
    StepSpec {
        provider: Provider::Github,
        order: 3,
        name: "github_pr_commits_and_comments",
        description: "commits and comments for pull requests seen in the previous step",
        depends_on_previous: true,
    },
];

pub fn jira_steps() -> &'static [StepSpec] {
    &JIRA_STEPS
}

pub fn github_steps() -> &'static [StepSpec] {
    &GITHUB_STEPS
}

pub fn steps_for(provider: Provider) -> &'static [StepSpec] {
    match provider {
        Provider::Jira => jira_steps(),
        Provider::Github => github_steps(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jira_sequence_is_contiguously_ordered() {
        for (i, step) in jira_steps().iter().enumerate() {
            assert_eq!(step.order, i);
        }
    }

    #[test]
    fn github_sequence_is_contiguously_ordered() {
        for (i, step) in github_steps().iter().enumerate() {
            assert_eq!(step.order, i);
        }
    }

    #[test]
    fn first_step_of_each_sequence_does_not_depend_on_a_previous_step() {
        assert!(!jira_steps()[0].depends_on_previous);
        assert!(!github_steps()[0].depends_on_previous);
    }
}
