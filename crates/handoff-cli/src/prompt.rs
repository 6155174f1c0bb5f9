use std::io::{BufRead, Write};

use handoff_sync::{
    Candidate, EntityKind, LinkAnswers, ResolutionAborted, ResolutionRequest, Resolver,
    ScriptedResolver, Selection,
};
use tracing::warn;

/// Asks on a terminal for anything the links file does not already answer.
pub struct PromptResolver<R, W> {
    answers: LinkAnswers,
    scripted: ScriptedResolver,
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptResolver<R, W> {
    pub fn new(answers: LinkAnswers, input: R, output: W) -> Self {
        Self {
            scripted: ScriptedResolver::new(answers.clone()),
            answers,
            input,
            output,
        }
    }

    fn answered(&self, kind: EntityKind, legacy_id: &str) -> bool {
        match kind {
            EntityKind::Team => self.answers.teams.contains_key(legacy_id),
            EntityKind::User => self.answers.users.contains_key(legacy_id),
        }
    }

    fn ask<T: Candidate>(&mut self, request: &ResolutionRequest<T>) -> std::io::Result<Option<Selection<T>>> {
        writeln!(self.output)?;
        writeln!(self.output, "{}", request.prompt)?;
        writeln!(self.output, "  0) no match")?;
        for (idx, candidate) in request.candidates.iter().enumerate() {
            writeln!(self.output, "  {}) {}", idx + 1, candidate.label())?;
        }

        loop {
            write!(
                self.output,
                "choice [0-{}, q to abort]: ",
                request.candidates.len()
            )?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let answer = line.trim();
            if answer.eq_ignore_ascii_case("q") {
                return Ok(None);
            }
            match answer.parse::<usize>() {
                Ok(0) => return Ok(Some(Selection::NoMatch)),
                Ok(n) if n <= request.candidates.len() => {
                    return Ok(Some(Selection::Selected(request.candidates[n - 1].clone())))
                }
                _ => writeln!(self.output, "not a choice: {answer:?}")?,
            }
        }
    }
}

impl<R: BufRead, W: Write> Resolver for PromptResolver<R, W> {
    fn resolve<T: Candidate>(
        &mut self,
        request: ResolutionRequest<T>,
    ) -> Result<Selection<T>, ResolutionAborted> {
        if self.answered(T::KIND, &request.legacy_id) {
            return self.scripted.resolve(request);
        }
        match self.ask(&request) {
            Ok(Some(selection)) => Ok(selection),
            Ok(None) => Err(ResolutionAborted::for_request(&request)),
            Err(err) => {
                warn!(error = %err, legacy_id = %request.legacy_id, "prompt failed; aborting");
                Err(ResolutionAborted::for_request(&request))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handoff_core::TargetTeam;
    use std::io::Cursor;

    fn request() -> ResolutionRequest<TargetTeam> {
        let team = |id: &str, name: &str| TargetTeam {
            id: id.into(),
            name: name.into(),
            slug: name.into(),
        };
        ResolutionRequest::new(
            "PSRE",
            "Link legacy team SRE",
            "SRE",
            vec![team("F2", "payments"), team("F1", "sre")],
        )
    }

    #[test]
    fn numbered_choice_picks_from_the_ranked_list() {
        let mut out = Vec::new();
        let mut resolver =
            PromptResolver::new(LinkAnswers::default(), Cursor::new("7\n1\n"), &mut out);
        let picked = resolver.resolve(request()).unwrap();
        assert!(matches!(picked, Selection::Selected(ref t) if t.id == "F1"));

        let shown = String::from_utf8(out).unwrap();
        assert!(shown.contains("1) sre (F1)"));
        assert!(shown.contains("not a choice: \"7\""));
    }

    #[test]
    fn zero_is_no_match_and_q_or_eof_abort() {
        let mut resolver =
            PromptResolver::new(LinkAnswers::default(), Cursor::new("0\n"), Vec::new());
        assert_eq!(resolver.resolve(request()).unwrap(), Selection::NoMatch);

        let mut resolver =
            PromptResolver::new(LinkAnswers::default(), Cursor::new("q\n"), Vec::new());
        assert!(resolver.resolve(request()).is_err());

        let mut resolver = PromptResolver::new(LinkAnswers::default(), Cursor::new(""), Vec::new());
        let err = resolver.resolve(request()).unwrap_err();
        assert_eq!(err.legacy_id, "PSRE");
    }

    #[test]
    fn links_file_answers_skip_the_prompt() {
        let answers = LinkAnswers::from_yaml_str("teams:\n  PSRE: F2\n").unwrap();
        let mut out = Vec::new();
        let mut resolver = PromptResolver::new(answers, Cursor::new(""), &mut out);
        let picked = resolver.resolve(request()).unwrap();
        assert!(matches!(picked, Selection::Selected(ref t) if t.id == "F2"));
        assert!(out.is_empty());
    }
}
