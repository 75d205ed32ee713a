//! Driving a session from the terminal: scripted, policy-driven or typed.
use anyhow::{Context, Result, bail};
use colored::Colorize;
use std::collections::VecDeque;
use std::io::{BufRead, Write};

use scamsense_engine::{
    Advance, Clock, Outcome, PlayRecord, PlaySession, Prompt, Step, StepView, Transition,
};

use crate::policy::PlayerPolicy;

/// Whoever answers the choice steps of a session.
pub trait Player {
    /// Called for every step the session enters.
    fn show(&mut self, _view: &StepView) -> Result<()> {
        Ok(())
    }

    /// Option id to take at `step`, or `None` to stop playing.
    fn choose(&mut self, step: &Step) -> Result<Option<String>>;

    /// Called after each accepted choice.
    fn chosen(&mut self, _step: &Step, _advance: &Advance) -> Result<()> {
        Ok(())
    }
}

/// Drive a started session until it ends or the player stops.
///
/// # Errors
///
/// Returns traversal errors and whatever the player fails with.
pub fn play_out<C: Clock>(
    session: &mut PlaySession<C>,
    first: Transition,
    player: &mut dyn Player,
) -> Result<()> {
    let mut transition = first;
    loop {
        let view = match transition {
            Transition::Ended(_) => return Ok(()),
            Transition::At(view) => view,
        };
        player.show(&view)?;
        transition = match view.prompt {
            Prompt::End => return Ok(()),
            Prompt::Continue => session.continue_on()?,
            Prompt::Choose => {
                let step = session
                    .scenario()
                    .step(&view.step_id)
                    .cloned()
                    .with_context(|| format!("step '{}' vanished", view.step_id))?;
                let Some(option_id) = player.choose(&step)? else {
                    return Ok(());
                };
                let advance = session.advance(&option_id)?;
                player.chosen(&step, &advance)?;
                advance.transition
            }
        };
    }
}

/// Adapts a [`PlayerPolicy`] to [`Player`].
pub struct PolicyPlayer<'a> {
    policy: &'a mut dyn PlayerPolicy,
}

impl<'a> PolicyPlayer<'a> {
    pub fn new(policy: &'a mut dyn PlayerPolicy) -> Self {
        Self { policy }
    }
}

impl Player for PolicyPlayer<'_> {
    fn choose(&mut self, step: &Step) -> Result<Option<String>> {
        let decision = self.policy.pick_option(step);
        if let Some(decision) = &decision {
            log::debug!(
                "{} picked {} at {} ({})",
                self.policy.name(),
                decision.option_id,
                step.id,
                decision.rationale.as_deref().unwrap_or("-")
            );
        }
        Ok(decision.map(|decision| decision.option_id))
    }
}

/// Answers choice steps from a fixed list of option ids.
pub struct ScriptedPlayer {
    choices: VecDeque<String>,
}

impl ScriptedPlayer {
    pub fn new(choices: Vec<String>) -> Self {
        Self {
            choices: choices.into(),
        }
    }

    /// Script entries that were never used.
    pub fn remaining(&self) -> usize {
        self.choices.len()
    }
}

impl Player for ScriptedPlayer {
    fn choose(&mut self, _step: &Step) -> Result<Option<String>> {
        Ok(self.choices.pop_front())
    }
}

/// Renders steps to `out` and delegates choices to an inner player.
pub struct Narrated<'a, P, W> {
    inner: P,
    out: &'a mut W,
}

impl<'a, P: Player, W: Write> Narrated<'a, P, W> {
    pub fn new(inner: P, out: &'a mut W) -> Self {
        Self { inner, out }
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P: Player, W: Write> Player for Narrated<'_, P, W> {
    fn show(&mut self, view: &StepView) -> Result<()> {
        write_step(self.out, view)?;
        self.inner.show(view)
    }

    fn choose(&mut self, step: &Step) -> Result<Option<String>> {
        self.inner.choose(step)
    }

    fn chosen(&mut self, step: &Step, advance: &Advance) -> Result<()> {
        write_feedback(self.out, step, advance)?;
        self.inner.chosen(step, advance)
    }
}

/// Reads the player's answer from `input`: an option number, an option id,
/// or `q` to stop.
pub struct InteractivePlayer<R, W> {
    input: R,
    out: W,
}

impl<R: BufRead, W: Write> InteractivePlayer<R, W> {
    pub const fn new(input: R, out: W) -> Self {
        Self { input, out }
    }
}

impl<R: BufRead, W: Write> Player for InteractivePlayer<R, W> {
    fn choose(&mut self, step: &Step) -> Result<Option<String>> {
        loop {
            write!(self.out, "{} ", "›".bright_cyan())?;
            self.out.flush()?;
            let mut line = String::new();
            if self.input.read_line(&mut line).context("failed to read answer")? == 0 {
                return Ok(None);
            }
            let answer = line.trim();
            if answer.eq_ignore_ascii_case("q") {
                return Ok(None);
            }
            if let Some(choice) = answer
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|index| step.options.get(index))
                .or_else(|| step.option(answer))
            {
                return Ok(Some(choice.id.clone()));
            }
            writeln!(
                self.out,
                "Pick 1-{} (or q to quit).",
                step.options.len()
            )?;
        }
    }
}

pub fn write_step<W: Write>(out: &mut W, view: &StepView) -> Result<()> {
    writeln!(out)?;
    let mut header = String::new();
    if let Some(channel) = view.narrative.channel {
        header.push_str(&format!("[{channel}] "));
    }
    if let Some(sender) = &view.narrative.sender {
        header.push_str(sender);
    }
    if !header.is_empty() {
        writeln!(out, "{}", header.trim_end().dimmed())?;
    }
    writeln!(out, "{}", view.narrative.text)?;
    for (index, option) in view.options.iter().enumerate() {
        writeln!(out, "  {}. {} ({})", index + 1, option.label, option.id.dimmed())?;
    }
    Ok(())
}

fn write_feedback<W: Write>(out: &mut W, step: &Step, advance: &Advance) -> Result<()> {
    let label = step
        .option(&advance.feedback.option_id)
        .map_or(advance.feedback.option_id.as_str(), |choice| choice.label.as_str());
    let outcome = match advance.feedback.outcome {
        Outcome::Safe => "safe".green().bold(),
        Outcome::Risky => "risky".yellow().bold(),
        Outcome::Dangerous => "dangerous".red().bold(),
    };
    writeln!(out, "→ {label}: {outcome}")?;
    if let Some(text) = &advance.feedback.feedback {
        writeln!(out, "  {}", text.italic())?;
    }
    Ok(())
}

pub fn write_result_card<W: Write>(out: &mut W, title: &str, record: &PlayRecord) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", format!("🛡️  {title}").bright_cyan().bold())?;
    writeln!(out, "{}", "================================".cyan())?;
    let verdict = match record.score.verdict {
        scamsense_engine::Verdict::Safe => "SAFE".green().bold(),
        scamsense_engine::Verdict::Compromised => "COMPROMISED".red().bold(),
    };
    writeln!(out, "Verdict: {verdict}")?;
    writeln!(out, "Score: {}", record.score.score)?;
    writeln!(out, "Mistakes: {}", record.score.mistakes)?;
    writeln!(out, "Best safe streak: {}", record.score.best_streak)?;
    writeln!(out, "Choices: {}", record.trace.choice_path().join(" -> "))?;
    match (&record.end_reason, record.completed) {
        (Some(reason), _) => writeln!(out, "Ended: {reason}")?,
        (None, false) => writeln!(out, "Ended: stopped before the scenario finished")?,
        (None, true) => {}
    }
    writeln!(out, "Session: {}", record.session_id.dimmed())?;
    Ok(())
}

/// Fail unless every scripted choice was consumed by a finished session.
pub fn check_script<C: Clock>(session: &PlaySession<C>, script: &ScriptedPlayer) -> Result<()> {
    if !session.is_finished() {
        let at = session
            .current_view()
            .map_or_else(|| "the entry".to_string(), |view| format!("step '{}'", view.step_id));
        bail!("scripted choices ran out at {at} before the scenario ended");
    }
    if script.remaining() > 0 {
        bail!(
            "scenario ended with {} scripted choice(s) left over",
            script.remaining()
        );
    }
    Ok(())
}
