use colored::*;
use recatalog_core::resolve::ConflictCandidate;
use recatalog_core::{CatalogEntry, ConflictCase, ConflictKind, ConflictResolver, Decision, Result};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

/// Asks the operator about every conflict on the terminal.
pub struct PromptResolver<R, W> {
    input: R,
    output: W,
}

impl PromptResolver<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> PromptResolver<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn read_answer(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_lowercase()))
    }

    fn print_case(&mut self, case: &ConflictCase) -> io::Result<()> {
        writeln!(self.output)?;
        writeln!(
            self.output,
            "{} {} ({}), {} candidates",
            format!("{}:", case.kind).yellow().bold(),
            case.hash,
            case.mode,
            case.candidates.len()
        )?;
        for (index, candidate) in case.candidates.iter().enumerate() {
            writeln!(
                self.output,
                "  [{}] {} {}",
                index + 1,
                markers(candidate, index == case.suggested),
                candidate.path.display()
            )?;
        }
        Ok(())
    }

    /// A file rewritten in place: the only choice is whether to record its new
    /// content.
    fn resolve_modified(&mut self, case: &ConflictCase, previous: &CatalogEntry) -> io::Result<Decision> {
        writeln!(self.output)?;
        writeln!(
            self.output,
            "{} {} now holds {} (catalogued as {})",
            "Modified:".yellow().bold(),
            previous.path.display(),
            case.hash,
            previous.hash
        )?;
        loop {
            write!(
                self.output,
                "Re-catalog {} with its new content? [Y/Enter = yes, s = skip, q = quit]: ",
                previous.path.display()
            )?;
            self.output.flush()?;

            let Some(answer) = self.read_answer()? else {
                return Ok(Decision::Abort);
            };
            match answer.as_str() {
                "" | "y" | "yes" => return Ok(Decision::Keep(0)),
                "s" | "n" | "no" => return Ok(Decision::Skip),
                "q" => return Ok(Decision::Abort),
                _ => continue,
            }
        }
    }
}

fn markers(candidate: &ConflictCandidate, suggested: bool) -> String {
    format!(
        "{}{}{}",
        if candidate.catalogued { "*" } else { " " },
        if candidate.exists { "   " } else { "DEL" },
        if suggested { "K" } else { " " }
    )
}

impl<R: BufRead, W: Write> ConflictResolver for PromptResolver<R, W> {
    fn resolve(&mut self, case: &ConflictCase) -> Result<Decision> {
        if let (ConflictKind::PathHashMismatch, Some(previous)) = (&case.kind, &case.replaces) {
            return Ok(self.resolve_modified(case, previous)?);
        }

        self.print_case(case)?;
        loop {
            write!(
                self.output,
                "Keep which? [1-{}, Enter = {}, s = skip, q = quit]: ",
                case.candidates.len(),
                case.suggested + 1
            )?;
            self.output.flush()?;

            let Some(answer) = self.read_answer()? else {
                return Ok(Decision::Abort);
            };
            match answer.as_str() {
                "" => return Ok(Decision::Keep(case.suggested)),
                "s" => return Ok(Decision::Skip),
                "q" => return Ok(Decision::Abort),
                number => match number.parse::<usize>() {
                    Ok(n) if (1..=case.candidates.len()).contains(&n) => {
                        return Ok(Decision::Keep(n - 1))
                    }
                    _ => continue,
                },
            }
        }
    }

    fn confirm_deletions(&mut self, paths: &[PathBuf]) -> Result<bool> {
        writeln!(self.output)?;
        writeln!(self.output, "{}", "Files to delete:".red().bold())?;
        for path in paths {
            writeln!(self.output, "  {}", path.display())?;
        }
        Ok(prompt_confirm(
            &mut self.input,
            &mut self.output,
            &format!("Delete these {} files?", paths.len()),
            Some(false),
        )?)
    }
}

pub fn prompt_confirm<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    prompt: &str,
    default: Option<bool>,
) -> io::Result<bool> {
    let mut line = String::new();

    loop {
        line.clear();

        match default {
            Some(true) => write!(output, "{} (Y/n): ", prompt)?,
            Some(false) | None => write!(output, "{} (y/N): ", prompt)?,
        }
        output.flush()?;

        if input.read_line(&mut line)? == 0 {
            return Ok(default.unwrap_or(false));
        }

        match line.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
