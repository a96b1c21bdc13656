use std::collections::{HashMap, HashSet};

use super::types::{
    BatchRequest, ExistingGrade, GradingPolicy, LineAction, LineDecision, ResolutionPlan,
};

/// Classifies every line of a batch against a roster snapshot. Pure: no
/// IO, deterministic, one decision per line in submission order, so the
/// preview endpoint can call it as often as it likes.
pub fn plan(
    roster: &HashSet<String>,
    existing: &HashMap<String, ExistingGrade>,
    request: &BatchRequest,
    policy: &GradingPolicy,
) -> ResolutionPlan {
    let reason = request.trimmed_reason();
    let mut seen: HashSet<&str> = HashSet::with_capacity(request.lines.len());
    let mut decisions = Vec::with_capacity(request.lines.len());

    for line in &request.lines {
        let action = if !seen.insert(line.student_id.as_str()) {
            LineAction::Invalid {
                reason: "duplicate student in batch".to_string(),
            }
        } else if !roster.contains(&line.student_id) {
            LineAction::Invalid {
                reason: "student not enrolled in group for period".to_string(),
            }
        } else if !line.numeric_grade.is_finite()
            || line.numeric_grade < policy.scale_min
            || line.numeric_grade > policy.scale_max
        {
            LineAction::Invalid {
                reason: format!(
                    "grade out of range ({}-{})",
                    policy.scale_min, policy.scale_max
                ),
            }
        } else {
            match existing.get(&line.student_id) {
                None => LineAction::Insert,
                Some(current) => {
                    if !request.permit_recalibration {
                        LineAction::UpdateBlocked {
                            existing: current.clone(),
                            reason: "grade already captured".to_string(),
                        }
                    } else if reason.chars().count() < policy.min_reason_len {
                        LineAction::Invalid {
                            reason: format!(
                                "recalibration reason required (min {} chars)",
                                policy.min_reason_len
                            ),
                        }
                    } else {
                        LineAction::UpdateAllowed {
                            existing: current.clone(),
                        }
                    }
                }
            }
        };
        decisions.push(LineDecision {
            student_id: line.student_id.clone(),
            action,
        });
    }

    ResolutionPlan { decisions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::LineItem;

    fn request(lines: Vec<LineItem>, permit: bool, reason: Option<&str>) -> BatchRequest {
        BatchRequest {
            school_id: "school-1".into(),
            group_id: "group-5a".into(),
            subject_id: "subject-math".into(),
            period_id: "period-q1".into(),
            captured_by_staff_id: "staff-1".into(),
            evaluation_type: "regular".into(),
            permit_recalibration: permit,
            reason: reason.map(|s| s.to_string()),
            lines,
        }
    }

    fn line(student: &str, grade: f64) -> LineItem {
        LineItem {
            student_id: student.into(),
            numeric_grade: grade,
            notes: None,
        }
    }

    fn roster(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn graded(entries: &[(&str, f64)]) -> HashMap<String, ExistingGrade> {
        entries
            .iter()
            .enumerate()
            .map(|(i, (sid, g))| {
                (
                    sid.to_string(),
                    ExistingGrade {
                        record_id: format!("rec-{}", i),
                        numeric_grade: *g,
                        notes: None,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn new_students_plan_as_inserts_in_submission_order() {
        let req = request(vec![line("s2", 8.0), line("s1", 6.5)], false, None);
        let p = plan(
            &roster(&["s1", "s2"]),
            &HashMap::new(),
            &req,
            &GradingPolicy::default(),
        );
        assert_eq!(p.decisions.len(), 2);
        assert_eq!(p.decisions[0].student_id, "s2");
        assert_eq!(p.decisions[0].action, LineAction::Insert);
        assert_eq!(p.decisions[1].student_id, "s1");
        assert_eq!(p.decisions[1].action, LineAction::Insert);
    }

    #[test]
    fn existing_grade_without_authorization_is_blocked() {
        let req = request(vec![line("s1", 8.5)], false, None);
        let p = plan(
            &roster(&["s1"]),
            &graded(&[("s1", 7.0)]),
            &req,
            &GradingPolicy::default(),
        );
        match &p.decisions[0].action {
            LineAction::UpdateBlocked { existing, reason } => {
                assert_eq!(existing.numeric_grade, 7.0);
                assert_eq!(reason, "grade already captured");
            }
            other => panic!("expected UpdateBlocked, got {:?}", other),
        }
    }

    #[test]
    fn recalibration_needs_a_real_reason() {
        let existing = graded(&[("s1", 7.0)]);
        let policy = GradingPolicy::default();

        let no_reason = request(vec![line("s1", 8.5)], true, None);
        let p = plan(&roster(&["s1"]), &existing, &no_reason, &policy);
        assert!(matches!(p.decisions[0].action, LineAction::Invalid { .. }));

        let short_reason = request(vec![line("s1", 8.5)], true, Some("typo"));
        let p = plan(&roster(&["s1"]), &existing, &short_reason, &policy);
        assert!(matches!(p.decisions[0].action, LineAction::Invalid { .. }));

        let padded = request(vec![line("s1", 8.5)], true, Some("   typo   "));
        let p = plan(&roster(&["s1"]), &existing, &padded, &policy);
        assert!(
            matches!(p.decisions[0].action, LineAction::Invalid { .. }),
            "whitespace must not count toward the minimum reason length"
        );

        let ok = request(
            vec![line("s1", 8.5)],
            true,
            Some("Exam re-grade approved by coordinator"),
        );
        let p = plan(&roster(&["s1"]), &existing, &ok, &policy);
        match &p.decisions[0].action {
            LineAction::UpdateAllowed { existing } => assert_eq!(existing.numeric_grade, 7.0),
            other => panic!("expected UpdateAllowed, got {:?}", other),
        }
    }

    #[test]
    fn out_of_range_and_non_finite_grades_are_invalid() {
        let policy = GradingPolicy::default();
        let req = request(
            vec![
                line("s1", 10.5),
                line("s2", -0.1),
                line("s3", f64::NAN),
                line("s4", 10.0),
                line("s5", 0.0),
            ],
            false,
            None,
        );
        let p = plan(
            &roster(&["s1", "s2", "s3", "s4", "s5"]),
            &HashMap::new(),
            &req,
            &policy,
        );
        assert!(matches!(p.decisions[0].action, LineAction::Invalid { .. }));
        assert!(matches!(p.decisions[1].action, LineAction::Invalid { .. }));
        assert!(matches!(p.decisions[2].action, LineAction::Invalid { .. }));
        assert_eq!(p.decisions[3].action, LineAction::Insert);
        assert_eq!(p.decisions[4].action, LineAction::Insert);
    }

    #[test]
    fn out_of_roster_students_never_reach_the_committer() {
        let req = request(vec![line("ghost", 9.0), line("s1", 9.0)], false, None);
        let p = plan(
            &roster(&["s1"]),
            &HashMap::new(),
            &req,
            &GradingPolicy::default(),
        );
        match &p.decisions[0].action {
            LineAction::Invalid { reason } => {
                assert_eq!(reason, "student not enrolled in group for period")
            }
            other => panic!("expected Invalid, got {:?}", other),
        }
        assert_eq!(p.decisions[1].action, LineAction::Insert);
    }

    #[test]
    fn duplicate_student_ids_invalidate_later_occurrences_only() {
        let req = request(
            vec![line("s1", 6.0), line("s1", 9.0), line("s1", 5.0)],
            false,
            None,
        );
        let p = plan(
            &roster(&["s1"]),
            &HashMap::new(),
            &req,
            &GradingPolicy::default(),
        );
        assert_eq!(p.decisions[0].action, LineAction::Insert);
        assert!(matches!(p.decisions[1].action, LineAction::Invalid { .. }));
        assert!(matches!(p.decisions[2].action, LineAction::Invalid { .. }));
    }

    #[test]
    fn wider_scale_from_policy_is_honored() {
        let policy = GradingPolicy {
            scale_min: 0.0,
            scale_max: 100.0,
            min_reason_len: 10,
        };
        let req = request(vec![line("s1", 85.0)], false, None);
        let p = plan(&roster(&["s1"]), &HashMap::new(), &req, &policy);
        assert_eq!(p.decisions[0].action, LineAction::Insert);
    }

    #[test]
    fn planning_is_deterministic_for_the_same_snapshot() {
        let existing = graded(&[("s2", 7.0)]);
        let members = roster(&["s1", "s2", "s3"]);
        let req = request(
            vec![line("s1", 6.0), line("s2", 9.0), line("s3", 11.0)],
            false,
            None,
        );
        let policy = GradingPolicy::default();
        let first = plan(&members, &existing, &req, &policy);
        for _ in 0..3 {
            let again = plan(&members, &existing, &req, &policy);
            assert_eq!(again.decisions.len(), first.decisions.len());
            for (a, b) in again.decisions.iter().zip(&first.decisions) {
                assert_eq!(a.student_id, b.student_id);
                assert_eq!(a.action, b.action);
            }
        }
    }
}
