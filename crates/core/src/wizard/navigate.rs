use thiserror::Error;

use crate::wizard::step::{StepDef, Wizard};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Forward<S> {
    Step(S),
    /// Past the last step: the wizard is done and the commit path runs.
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backward<S> {
    Step(S),
    /// Before the first step: leave the wizard and return to the home menu.
    Exit,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NavigationError {
    #[error("step `{0}` is not part of this wizard's registry")]
    UnknownStep(String),
}

fn position<W: Wizard + ?Sized>(
    steps: &[StepDef<W>],
    step: W::Step,
) -> Result<usize, NavigationError> {
    steps
        .iter()
        .position(|def| def.step == step)
        .ok_or_else(|| NavigationError::UnknownStep(format!("{step:?}")))
}

/// First active step of a wizard, with the same default-fill semantics as a
/// forward transition.
pub fn entry_step<W: Wizard + 'static>(wizard: &W, data: &mut W::Data) -> Forward<W::Step> {
    scan_forward(wizard, data, 0)
}

/// Forward transition from an answered step. The caller has already written
/// the validated value; this resolves where the wizard goes next.
///
/// Order of consultation: the answered step's jump override first (answers
/// that deactivate an entire sub-range move in one pass), then linear
/// increment, then the skip-scan over condition-false steps, running each
/// skipped step's default fill before moving on.
pub fn advance<W: Wizard + 'static>(
    wizard: &W,
    data: &mut W::Data,
    from: W::Step,
) -> Result<Forward<W::Step>, NavigationError> {
    let steps = wizard.steps();
    let index = position(steps, from)?;

    if let Some(resolve) = wizard.jump_override(from) {
        if let Some(target) = resolve(data) {
            let target_index = position(steps, target)?;
            return Ok(scan_forward(wizard, data, target_index));
        }
    }

    Ok(scan_forward(wizard, data, index + 1))
}

fn scan_forward<W: Wizard + 'static>(wizard: &W, data: &mut W::Data, start: usize) -> Forward<W::Step> {
    let steps = wizard.steps();
    let mut cursor = start;
    while let Some(def) = steps.get(cursor) {
        if def.condition.map_or(true, |active| active(data)) {
            return Forward::Step(def.step);
        }
        if let Some(fill) = def.default_fill {
            fill(data);
        }
        cursor += 1;
    }
    Forward::Complete
}

/// Backward transition on the literal back command. Consults the wizard's
/// backward-override table first; otherwise decrements with the skip-scan
/// toward the start. The re-entered step's field is cleared so a stale
/// answer cannot linger; every other field is preserved.
pub fn retreat<W: Wizard + 'static>(
    wizard: &W,
    data: &mut W::Data,
    from: W::Step,
) -> Result<Backward<W::Step>, NavigationError> {
    let steps = wizard.steps();
    let index = position(steps, from)?;

    if let Some(resolve) = wizard.back_override(from) {
        let target = resolve(data);
        let target_index = position(steps, target)?;
        (steps[target_index].clear)(data);
        return Ok(Backward::Step(target));
    }

    let mut cursor = index;
    while cursor > 0 {
        cursor -= 1;
        let def = &steps[cursor];
        if def.condition.map_or(true, |active| active(data)) {
            (def.clear)(data);
            return Ok(Backward::Step(def.step));
        }
    }
    Ok(Backward::Exit)
}
