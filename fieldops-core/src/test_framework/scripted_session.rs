use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use async_trait::async_trait;
use chrono::Utc;

use crate::browser::{
    BrowserError, BrowserResult, DrivenSession, ElementHandle, Locator, Probe, SessionFactory,
    SessionSnapshot,
};

/// Everything the core asked a [`ScriptedSession`] to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    Goto(String),
    Activated(Locator),
    Filled(Locator, String),
    Screenshot,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visibility {
    Present,
    Interactable,
}

#[derive(Debug, Default)]
struct ElementScript {
    visibility: Option<Visibility>,
    stale_activations: usize,
    activations: usize,
    probe_failure: Option<String>,
}

#[derive(Debug)]
struct Reveal {
    trigger: Locator,
    after_activations: usize,
    target: Locator,
    visibility: Option<Visibility>,
}

type ActivationHook = Rc<dyn Fn(usize)>;

#[derive(Default)]
struct ScriptState {
    elements: HashMap<Locator, ElementScript>,
    reveals: Vec<Reveal>,
    hooks: Vec<(Locator, ActivationHook)>,
    handles: HashMap<u64, Locator>,
    next_handle: u64,
    actions: Vec<SessionAction>,
    fail_screenshot: bool,
}

/// In-memory [`DrivenSession`] whose page is described up front: which
/// locators resolve, which activations go stale, and what each activation
/// reveals. Clones share state, so a test can keep one while the core owns
/// another.
#[derive(Clone, Default)]
pub struct ScriptedSession {
    state: Rc<RefCell<ScriptState>>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interactable(self, locator: &Locator) -> Self {
        self.set_visibility(locator, Visibility::Interactable);
        self
    }

    /// Attached but never clickable.
    pub fn with_present(self, locator: &Locator) -> Self {
        self.set_visibility(locator, Visibility::Present);
        self
    }

    /// Every probe of `locator` fails as if the browser connection dropped.
    pub fn with_broken_probe(self, locator: &Locator, message: impl Into<String>) -> Self {
        self.state
            .borrow_mut()
            .elements
            .entry(locator.clone())
            .or_default()
            .probe_failure = Some(message.into());
        self
    }

    /// The next `count` activations of `locator` fail with a stale reference.
    pub fn with_stale_activations(self, locator: &Locator, count: usize) -> Self {
        {
            let mut state = self.state.borrow_mut();
            let script = state.elements.entry(locator.clone()).or_default();
            script.visibility = Some(Visibility::Interactable);
            script.stale_activations = count;
        }
        self
    }

    /// Makes `target` interactable once `trigger` has been activated
    /// `after_activations` times.
    pub fn reveal_after(
        self,
        trigger: &Locator,
        after_activations: usize,
        target: &Locator,
    ) -> Self {
        self.push_reveal(trigger, after_activations, target, Some(Visibility::Interactable));
        self
    }

    /// Detaches `target` once `trigger` has been activated `after_activations`
    /// times.
    pub fn hide_after(self, trigger: &Locator, after_activations: usize, target: &Locator) -> Self {
        self.push_reveal(trigger, after_activations, target, None);
        self
    }

    /// Runs `hook` with the activation count after each successful activation
    /// of `locator`.
    pub fn on_activate(self, locator: &Locator, hook: impl Fn(usize) + 'static) -> Self {
        self.state
            .borrow_mut()
            .hooks
            .push((locator.clone(), Rc::new(hook)));
        self
    }

    pub fn with_failing_screenshot(self) -> Self {
        self.state.borrow_mut().fail_screenshot = true;
        self
    }

    pub fn actions(&self) -> Vec<SessionAction> {
        self.state.borrow().actions.clone()
    }

    pub fn activations_of(&self, locator: &Locator) -> usize {
        self.state
            .borrow()
            .elements
            .get(locator)
            .map(|script| script.activations)
            .unwrap_or(0)
    }

    pub fn close_count(&self) -> usize {
        self.state
            .borrow()
            .actions
            .iter()
            .filter(|action| matches!(action, SessionAction::Closed))
            .count()
    }

    fn set_visibility(&self, locator: &Locator, visibility: Visibility) {
        self.state
            .borrow_mut()
            .elements
            .entry(locator.clone())
            .or_default()
            .visibility = Some(visibility);
    }

    fn push_reveal(
        &self,
        trigger: &Locator,
        after_activations: usize,
        target: &Locator,
        visibility: Option<Visibility>,
    ) {
        self.state.borrow_mut().reveals.push(Reveal {
            trigger: trigger.clone(),
            after_activations,
            target: target.clone(),
            visibility,
        });
    }

    fn resolve(&self, element: &ElementHandle) -> BrowserResult<Locator> {
        self.state
            .borrow()
            .handles
            .get(&element.id())
            .cloned()
            .ok_or_else(|| BrowserError::StaleReference(format!("handle {}", element.id())))
    }
}

#[async_trait(?Send)]
impl DrivenSession for ScriptedSession {
    async fn goto(&self, url: &str) -> BrowserResult<()> {
        self.state
            .borrow_mut()
            .actions
            .push(SessionAction::Goto(url.to_string()));
        Ok(())
    }

    async fn probe(&self, locator: &Locator) -> BrowserResult<Probe> {
        let mut state = self.state.borrow_mut();
        let script = state.elements.get(locator);
        if let Some(message) = script.and_then(|script| script.probe_failure.clone()) {
            return Err(BrowserError::Unexpected(message));
        }
        let visibility = script.and_then(|script| script.visibility);
        match visibility {
            None => Ok(Probe::Absent),
            Some(Visibility::Present) => Ok(Probe::Present),
            Some(Visibility::Interactable) => {
                state.next_handle += 1;
                let id = state.next_handle;
                state.handles.insert(id, locator.clone());
                Ok(Probe::Interactable(ElementHandle::new(id)))
            }
        }
    }

    async fn activate(&self, element: &ElementHandle) -> BrowserResult<()> {
        let locator = self.resolve(element)?;
        let (count, hooks) = {
            let mut state = self.state.borrow_mut();
            let script = state.elements.entry(locator.clone()).or_default();
            if script.stale_activations > 0 {
                script.stale_activations -= 1;
                return Err(BrowserError::StaleReference(locator.to_string()));
            }
            script.activations += 1;
            let count = script.activations;
            state.actions.push(SessionAction::Activated(locator.clone()));
            let changes: Vec<(Locator, Option<Visibility>)> = state
                .reveals
                .iter()
                .filter(|reveal| reveal.trigger == locator && reveal.after_activations == count)
                .map(|reveal| (reveal.target.clone(), reveal.visibility))
                .collect();
            for (target, visibility) in changes {
                state.elements.entry(target).or_default().visibility = visibility;
            }
            let hooks: Vec<ActivationHook> = state
                .hooks
                .iter()
                .filter(|(trigger, _)| *trigger == locator)
                .map(|(_, hook)| Rc::clone(hook))
                .collect();
            (count, hooks)
        };
        for hook in hooks {
            hook(count);
        }
        Ok(())
    }

    async fn fill(&self, element: &ElementHandle, text: &str) -> BrowserResult<()> {
        let locator = self.resolve(element)?;
        self.state
            .borrow_mut()
            .actions
            .push(SessionAction::Filled(locator, text.to_string()));
        Ok(())
    }

    async fn current_state(&self) -> BrowserResult<SessionSnapshot> {
        let url = self
            .state
            .borrow()
            .actions
            .iter()
            .rev()
            .find_map(|action| match action {
                SessionAction::Goto(url) => Some(url.clone()),
                _ => None,
            });
        Ok(SessionSnapshot {
            url,
            title: Some("scripted".to_string()),
            captured_at: Utc::now(),
        })
    }

    async fn screenshot(&self) -> BrowserResult<Vec<u8>> {
        let mut state = self.state.borrow_mut();
        if state.fail_screenshot {
            return Err(BrowserError::Unexpected("screenshot unavailable".into()));
        }
        state.actions.push(SessionAction::Screenshot);
        Ok(b"\x89PNG scripted".to_vec())
    }

    async fn close(&self) -> BrowserResult<()> {
        self.state.borrow_mut().actions.push(SessionAction::Closed);
        Ok(())
    }
}

/// Hands out clones of one [`ScriptedSession`], or fails to launch.
#[derive(Clone, Default)]
pub struct ScriptedSessionFactory {
    session: ScriptedSession,
    launch_failure: Option<String>,
    created: Rc<RefCell<usize>>,
}

impl ScriptedSessionFactory {
    pub fn new(session: ScriptedSession) -> Self {
        Self {
            session,
            launch_failure: None,
            created: Rc::new(RefCell::new(0)),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            launch_failure: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn created(&self) -> usize {
        *self.created.borrow()
    }
}

#[async_trait(?Send)]
impl SessionFactory for ScriptedSessionFactory {
    async fn create(&self) -> BrowserResult<Box<dyn DrivenSession>> {
        if let Some(message) = &self.launch_failure {
            return Err(BrowserError::Launch(message.clone()));
        }
        *self.created.borrow_mut() += 1;
        Ok(Box::new(self.session.clone()))
    }
}
