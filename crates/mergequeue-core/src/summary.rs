//! Renders the user-facing merge queue summary body (spec §4.2.5, §6.3).

use crate::embarked_pull::PrNumber;
use crate::host_api::CheckSnapshot;
use crate::train_car::{CreationState, TrainCar};
use crate::unexpected_change::UnexpectedChange;

/// Joins PR numbers the way the headline and title need them:
/// "#1", "#1 and #2", "#1, #2 and #3".
pub fn join_pr_list(numbers: &[PrNumber]) -> String {
    match numbers {
        [] => String::new(),
        [only] => format!("#{only}"),
        [rest @ .., last] => {
            let head = rest
                .iter()
                .map(|n| format!("#{n}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{head} and #{last}")
        }
    }
}

/// Title selection per `(conclusion, |initial_embarked_pulls|, creation_state)` (spec §4.2.5 table).
pub fn title_for(car: &TrainCar) -> String {
    use crate::train_car::ChecksConclusion::*;
    let numbers: Vec<PrNumber> = car.initial_embarked_pulls.iter().map(|p| p.pr_number).collect();
    let single = numbers.len() == 1;
    let refs = join_pr_list(&numbers);
    match (car.checks_conclusion, single) {
        (Success, true) => format!("PR {refs} is mergeable"),
        (Success, false) => format!("PRs {refs} are mergeable"),
        (Failure, true) => format!("PR {refs} cannot be merged and has been disembarked"),
        (Failure, false) => format!("PRs {refs} cannot be merged and will be split"),
        (_, true) => format!("PR {refs} is embarked for merge"),
        (_, false) => format!("PRs {refs} are embarked for merge"),
    }
}

/// `"merge-queue: embarking <refs> together"` draft PR title (spec §4.2.2).
pub fn draft_pull_title(numbers: &[PrNumber]) -> String {
    format!("merge-queue: embarking {} together", join_pr_list(numbers))
}

/// Icon used per check conclusion/status in the checks-copy table (grounded
/// on the original engine's check-assertion icon mapping).
fn check_icon(check: &CheckSnapshot) -> &'static str {
    match (check.status.as_str(), check.conclusion.as_deref()) {
        (_, Some("success")) => "✅",
        (_, Some("failure")) | (_, Some("timed_out")) => "❌",
        (_, Some("cancelled")) => "🚫",
        (_, Some("neutral")) | (_, Some("skipped")) => "⚪",
        (_, Some("action_required")) => "⚠️",
        ("completed", None) => "⚪",
        _ => "⏳",
    }
}

fn checks_table(checks: &[CheckSnapshot]) -> String {
    if checks.is_empty() {
        return String::new();
    }
    let mut body = String::from("\n| | Name | Status |\n| --- | --- | --- |\n");
    for check in checks {
        let status = check.conclusion.as_deref().unwrap_or(&check.status);
        body.push_str(&format!("| {} | {} | {} |\n", check_icon(check), check.name, status));
    }
    body
}

fn batch_failure_history_table(car: &TrainCar) -> String {
    if car.failure_history.is_empty() {
        return String::new();
    }
    let mut body = String::from("\n<details>\n<summary>Batch failure history</summary>\n\n| Batch | Result |\n| --- | --- |\n");
    for historical in &car.failure_history {
        let numbers: Vec<PrNumber> = historical
            .initial_embarked_pulls
            .iter()
            .map(|p| p.pr_number)
            .collect();
        body.push_str(&format!(
            "| {} | {:?} |\n",
            join_pr_list(&numbers),
            historical.checks_conclusion
        ));
    }
    body.push_str("\n</details>\n");
    body
}

/// Headline: `Branch **<ref>** (<short-sha>), #P1, …, and #N` (spec §6.3).
pub fn embarked_header(target_ref: &str, short_sha: &str, pr_numbers: &[PrNumber]) -> String {
    format!(
        "Branch **{target_ref}** ({short_sha}), {}",
        join_pr_list(pr_numbers)
    )
}

/// Footer rendering the car's position among its train's waiting/active cars.
pub fn render_footer(position: usize, total: usize) -> String {
    format!("\n\n---\nPosition in queue: {} of {}\n", position + 1, total)
}

/// Full summary body for a car (spec §4.2.5).
pub fn render_body(
    car: &TrainCar,
    target_ref: &str,
    base_short_sha: &str,
    unexpected_change: Option<&UnexpectedChange>,
) -> String {
    let numbers: Vec<PrNumber> = car.initial_embarked_pulls.iter().map(|p| p.pr_number).collect();
    let mut body = embarked_header(target_ref, base_short_sha, &numbers);
    body.push('\n');

    if let Some(change) = unexpected_change {
        body.push_str(&format!("\n> ⚠️ {}\n", change.banner()));
    }
    if car.has_timed_out {
        body.push_str("\n> ⏱️ The checks timed out before a conclusion was reached.\n");
    }
    if let Some(conditions) = &car.last_evaluated_conditions {
        body.push_str(&format!("\n**Required conditions:**\n\n{conditions}\n"));
    }
    body.push_str(&checks_table(&car.last_checks));
    body.push_str(&batch_failure_history_table(car));

    if car.creation_state == CreationState::Failed {
        body.push_str("\nThis batch could not be checked and has been disembarked.\n");
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_pr_list_formats_single_pair_and_triple() {
        assert_eq!(join_pr_list(&[1]), "#1");
        assert_eq!(join_pr_list(&[1, 2]), "#1 and #2");
        assert_eq!(join_pr_list(&[1, 2, 3]), "#1, #2 and #3");
    }

    #[test]
    fn draft_pull_title_matches_contract() {
        assert_eq!(
            draft_pull_title(&[41, 42]),
            "merge-queue: embarking #41 and #42 together"
        );
    }

    #[test]
    fn embarked_header_matches_contract_shape() {
        let header = embarked_header("main", "abc1234", &[7]);
        assert_eq!(header, "Branch **main** (abc1234), #7");
    }
}
