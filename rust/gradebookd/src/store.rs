//! Repository seams for the grading core. The engines only see these traits;
//! the SQLite implementations live here too and are used through
//! `rusqlite::Connection` (a `Transaction` derefs to one).

use crate::calc::Components;
use crate::error::CoreResult;
use crate::grading::GradeBand;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct AssessmentKey<'a> {
    pub student_id: &'a str,
    pub offering_id: &'a str,
    pub term_id: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredAssessment {
    pub id: String,
    pub components: Components,
    pub total_score: Option<f64>,
    pub grade: Option<String>,
    pub class_position: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct OfferingInfo {
    pub id: String,
    pub class_level: String,
}

pub trait AssessmentStore {
    fn find_offering(&self, offering_id: &str) -> CoreResult<Option<OfferingInfo>>;
    fn student_exists(&self, student_id: &str) -> CoreResult<bool>;
    fn find_assessment(&self, key: AssessmentKey<'_>) -> CoreResult<Option<StoredAssessment>>;
    /// Overwrites the components of an existing row or creates one stamped
    /// with `actor_id`. Returns the row id.
    fn create_or_update_assessment(
        &self,
        key: AssessmentKey<'_>,
        components: &Components,
        actor_id: &str,
        stamp: &str,
    ) -> CoreResult<String>;
    fn set_assessment_grade(
        &self,
        assessment_id: &str,
        total: f64,
        band: Option<&GradeBand>,
    ) -> CoreResult<()>;
    /// Every assessment of the (offering, term) cohort with its total.
    fn cohort_totals(&self, offering_id: &str, term_id: &str)
        -> CoreResult<Vec<(String, Option<f64>)>>;
    fn set_assessment_position(&self, assessment_id: &str, position: Option<i64>)
        -> CoreResult<()>;
}

#[derive(Debug, Clone)]
pub struct EnrollmentRow {
    pub enrollment_id: String,
    pub student_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttendanceTally {
    pub total_days: i64,
    pub days_present: i64,
    pub days_absent: i64,
}

#[derive(Debug, Clone)]
pub struct TermReportDraft<'a> {
    pub student_id: &'a str,
    pub term_id: &'a str,
    pub enrollment_id: &'a str,
    pub class_id: &'a str,
    pub total_marks: Option<f64>,
    pub average_score: Option<f64>,
    pub class_size: Option<i64>,
    pub attendance: AttendanceTally,
}

pub trait TermReportStore {
    fn class_exists(&self, class_id: &str) -> CoreResult<bool>;
    fn class_enrollments(&self, class_id: &str, academic_year_id: &str)
        -> CoreResult<Vec<EnrollmentRow>>;
    /// Totals of the student's assessments in offerings of `class_id`.
    fn subject_totals(&self, student_id: &str, class_id: &str, term_id: &str)
        -> CoreResult<Vec<Option<f64>>>;
    /// Attendance statuses recorded for the student in `class_id` with
    /// `from <= date <= to` (ISO dates).
    fn attendance_statuses(&self, student_id: &str, class_id: &str, from: &str, to: &str)
        -> CoreResult<Vec<String>>;
    fn find_term_report(&self, student_id: &str, term_id: &str) -> CoreResult<Option<String>>;
    fn create_or_update_term_report(&self, draft: &TermReportDraft<'_>, stamp: &str)
        -> CoreResult<String>;
    fn cohort_averages(&self, class_id: &str, term_id: &str)
        -> CoreResult<Vec<(String, Option<f64>)>>;
    fn set_report_position(&self, report_id: &str, position: Option<i64>) -> CoreResult<()>;
    /// Flips publication for the whole cohort; returns the number of rows.
    fn set_cohort_published(
        &self,
        class_id: &str,
        term_id: &str,
        published_at: Option<&str>,
    ) -> CoreResult<usize>;
}

impl AssessmentStore for Connection {
    fn find_offering(&self, offering_id: &str) -> CoreResult<Option<OfferingInfo>> {
        Ok(self
            .query_row(
                "SELECT o.id, c.level
                 FROM subject_offerings o
                 JOIN classes c ON c.id = o.class_id
                 WHERE o.id = ?",
                [offering_id],
                |r| {
                    Ok(OfferingInfo {
                        id: r.get(0)?,
                        class_level: r.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    fn student_exists(&self, student_id: &str) -> CoreResult<bool> {
        Ok(self
            .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()?
            .is_some())
    }

    fn find_assessment(&self, key: AssessmentKey<'_>) -> CoreResult<Option<StoredAssessment>> {
        Ok(self
            .query_row(
                "SELECT id, classwork, homework, project, exam, total_score, grade, class_position
                 FROM assessments
                 WHERE student_id = ? AND offering_id = ? AND term_id = ?",
                (key.student_id, key.offering_id, key.term_id),
                |r| {
                    Ok(StoredAssessment {
                        id: r.get(0)?,
                        components: Components {
                            classwork: r.get(1)?,
                            homework: r.get(2)?,
                            project: r.get(3)?,
                            exam: r.get(4)?,
                        },
                        total_score: r.get(5)?,
                        grade: r.get(6)?,
                        class_position: r.get(7)?,
                    })
                },
            )
            .optional()?)
    }

    fn create_or_update_assessment(
        &self,
        key: AssessmentKey<'_>,
        components: &Components,
        actor_id: &str,
        stamp: &str,
    ) -> CoreResult<String> {
        if let Some(existing) = self.find_assessment(key)? {
            self.execute(
                "UPDATE assessments
                 SET classwork = ?, homework = ?, project = ?, exam = ?, updated_at = ?
                 WHERE id = ?",
                (
                    components.classwork,
                    components.homework,
                    components.project,
                    components.exam,
                    stamp,
                    &existing.id,
                ),
            )?;
            return Ok(existing.id);
        }

        let id = Uuid::new_v4().to_string();
        self.execute(
            "INSERT INTO assessments(
                id, student_id, offering_id, term_id,
                classwork, homework, project, exam,
                recorded_by, created_at, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                &id,
                key.student_id,
                key.offering_id,
                key.term_id,
                components.classwork,
                components.homework,
                components.project,
                components.exam,
                actor_id,
                stamp,
                stamp,
            ],
        )?;
        Ok(id)
    }

    fn set_assessment_grade(
        &self,
        assessment_id: &str,
        total: f64,
        band: Option<&GradeBand>,
    ) -> CoreResult<()> {
        self.execute(
            "UPDATE assessments SET total_score = ?, grade = ?, grade_remark = ? WHERE id = ?",
            (
                total,
                band.map(|b| b.code.as_str()),
                band.map(|b| b.remark.as_str()),
                assessment_id,
            ),
        )?;
        Ok(())
    }

    fn cohort_totals(
        &self,
        offering_id: &str,
        term_id: &str,
    ) -> CoreResult<Vec<(String, Option<f64>)>> {
        let mut stmt = self.prepare(
            "SELECT id, total_score FROM assessments WHERE offering_id = ? AND term_id = ?",
        )?;
        let rows = stmt
            .query_map((offering_id, term_id), |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn set_assessment_position(
        &self,
        assessment_id: &str,
        position: Option<i64>,
    ) -> CoreResult<()> {
        self.execute(
            "UPDATE assessments SET class_position = ? WHERE id = ?",
            (position, assessment_id),
        )?;
        Ok(())
    }
}

impl TermReportStore for Connection {
    fn class_exists(&self, class_id: &str) -> CoreResult<bool> {
        Ok(self
            .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()?
            .is_some())
    }

    fn class_enrollments(
        &self,
        class_id: &str,
        academic_year_id: &str,
    ) -> CoreResult<Vec<EnrollmentRow>> {
        let mut stmt = self.prepare(
            "SELECT e.id, e.student_id
             FROM enrollments e
             JOIN students s ON s.id = e.student_id
             WHERE e.class_id = ? AND e.academic_year_id = ?
             ORDER BY s.last_name, s.first_name",
        )?;
        let rows = stmt
            .query_map((class_id, academic_year_id), |r| {
                Ok(EnrollmentRow {
                    enrollment_id: r.get(0)?,
                    student_id: r.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn subject_totals(
        &self,
        student_id: &str,
        class_id: &str,
        term_id: &str,
    ) -> CoreResult<Vec<Option<f64>>> {
        let mut stmt = self.prepare(
            "SELECT a.total_score
             FROM assessments a
             JOIN subject_offerings o ON o.id = a.offering_id
             WHERE a.student_id = ? AND a.term_id = ? AND o.class_id = ?",
        )?;
        let rows = stmt
            .query_map((student_id, term_id, class_id), |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn attendance_statuses(
        &self,
        student_id: &str,
        class_id: &str,
        from: &str,
        to: &str,
    ) -> CoreResult<Vec<String>> {
        let mut stmt = self.prepare(
            "SELECT status FROM attendance
             WHERE student_id = ? AND class_id = ? AND date >= ? AND date <= ?",
        )?;
        let rows = stmt
            .query_map((student_id, class_id, from, to), |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn find_term_report(&self, student_id: &str, term_id: &str) -> CoreResult<Option<String>> {
        Ok(self
            .query_row(
                "SELECT id FROM term_reports WHERE student_id = ? AND term_id = ?",
                (student_id, term_id),
                |r| r.get(0),
            )
            .optional()?)
    }

    fn create_or_update_term_report(
        &self,
        draft: &TermReportDraft<'_>,
        stamp: &str,
    ) -> CoreResult<String> {
        let tally = draft.attendance;
        if let Some(id) = self.find_term_report(draft.student_id, draft.term_id)? {
            self.execute(
                "UPDATE term_reports
                 SET enrollment_id = ?, class_id = ?, total_marks = ?, average_score = ?,
                     class_size = ?, total_days = ?, days_present = ?, days_absent = ?
                 WHERE id = ?",
                rusqlite::params![
                    draft.enrollment_id,
                    draft.class_id,
                    draft.total_marks,
                    draft.average_score,
                    draft.class_size,
                    tally.total_days,
                    tally.days_present,
                    tally.days_absent,
                    &id,
                ],
            )?;
            return Ok(id);
        }

        let id = Uuid::new_v4().to_string();
        self.execute(
            "INSERT INTO term_reports(
                id, student_id, term_id, enrollment_id, class_id,
                total_marks, average_score, class_size,
                total_days, days_present, days_absent, generated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                &id,
                draft.student_id,
                draft.term_id,
                draft.enrollment_id,
                draft.class_id,
                draft.total_marks,
                draft.average_score,
                draft.class_size,
                tally.total_days,
                tally.days_present,
                tally.days_absent,
                stamp,
            ],
        )?;
        Ok(id)
    }

    fn cohort_averages(
        &self,
        class_id: &str,
        term_id: &str,
    ) -> CoreResult<Vec<(String, Option<f64>)>> {
        let mut stmt = self.prepare(
            "SELECT id, average_score FROM term_reports WHERE class_id = ? AND term_id = ?",
        )?;
        let rows = stmt
            .query_map((class_id, term_id), |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn set_report_position(&self, report_id: &str, position: Option<i64>) -> CoreResult<()> {
        self.execute(
            "UPDATE term_reports SET class_position = ? WHERE id = ?",
            (position, report_id),
        )?;
        Ok(())
    }

    fn set_cohort_published(
        &self,
        class_id: &str,
        term_id: &str,
        published_at: Option<&str>,
    ) -> CoreResult<usize> {
        let n = self.execute(
            "UPDATE term_reports SET is_published = ?, published_at = ?
             WHERE class_id = ? AND term_id = ?",
            (published_at.is_some() as i64, published_at, class_id, term_id),
        )?;
        Ok(n)
    }
}
