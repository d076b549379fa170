//! 通用有限状态机执行器
//!
//! - 事件是封闭枚举，按无字段的 `Kind` 分派
//! - 同一事件的多个候选转换按声明顺序求值守卫，第一个通过的生效
//! - 动作依次执行（同步或异步），作用在上下文的工作副本上，每次转换产生新的不可变上下文
//! - 动作出错时：已执行动作的修改保留，状态不变，经 `on_error` 上报
//! - 不排队，调用方不得重入 `send`

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

/// 状态机事件
pub trait MachineEvent: Clone + Debug + Send + Sync + 'static {
    /// 无字段的事件类型，用作分派键
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

pub type Guard<C, E> = Arc<dyn Fn(&C, &E) -> bool + Send + Sync>;

type SyncAction<C, E> = Arc<dyn Fn(&mut C, &E) -> anyhow::Result<()> + Send + Sync>;
type AsyncAction<C, E> =
    Arc<dyn Fn(C, E) -> BoxFuture<'static, anyhow::Result<C>> + Send + Sync>;

/// 转换动作
pub enum Action<C, E> {
    Sync(SyncAction<C, E>),
    /// 接收上下文副本，返回修改后的上下文
    Async(AsyncAction<C, E>),
}

impl<C, E> Clone for Action<C, E> {
    fn clone(&self) -> Self {
        match self {
            Action::Sync(f) => Action::Sync(f.clone()),
            Action::Async(f) => Action::Async(f.clone()),
        }
    }
}

pub type TransitionHook<S, E> = Arc<dyn Fn(S, S, &E) + Send + Sync>;
pub type ErrorHook<S, E> = Arc<dyn Fn(&anyhow::Error, S, &E) + Send + Sync>;

/// 单条转换定义
pub struct Transition<S, C, E> {
    target: S,
    guard: Option<Guard<C, E>>,
    actions: Vec<Action<C, E>>,
}

impl<S, C, E> Transition<S, C, E>
where
    C: Send + 'static,
    E: Send + 'static,
{
    pub fn to(target: S) -> Self {
        Self {
            target,
            guard: None,
            actions: Vec::new(),
        }
    }

    pub fn guard(mut self, guard: impl Fn(&C, &E) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    pub fn action(
        mut self,
        action: impl Fn(&mut C, &E) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.actions.push(Action::Sync(Arc::new(action)));
        self
    }

    pub fn async_action<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn(C, E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<C>> + Send + 'static,
    {
        self.actions
            .push(Action::Async(Arc::new(move |ctx, event| action(ctx, event).boxed())));
        self
    }
}

/// 单个状态的定义：事件转换表 + 进入动作
pub struct StateNode<S, C, E: MachineEvent> {
    on: HashMap<E::Kind, Vec<Transition<S, C, E>>>,
    entry: Vec<Action<C, E>>,
}

impl<S, C, E: MachineEvent> Default for StateNode<S, C, E> {
    fn default() -> Self {
        Self {
            on: HashMap::new(),
            entry: Vec::new(),
        }
    }
}

impl<S, C, E> StateNode<S, C, E>
where
    C: Send + 'static,
    E: MachineEvent,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条候选转换；同一事件可多次调用，按调用顺序求值
    pub fn on(mut self, kind: E::Kind, transition: Transition<S, C, E>) -> Self {
        self.on.entry(kind).or_default().push(transition);
        self
    }

    /// 状态真正改变后执行的进入动作
    pub fn entry(
        mut self,
        action: impl Fn(&mut C, &E) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.entry.push(Action::Sync(Arc::new(action)));
        self
    }
}

/// 状态机定义
pub struct MachineConfig<S, C, E: MachineEvent> {
    initial: S,
    context: C,
    states: HashMap<S, StateNode<S, C, E>>,
    on_transition: Option<TransitionHook<S, E>>,
    on_error: Option<ErrorHook<S, E>>,
}

impl<S, C, E> MachineConfig<S, C, E>
where
    S: Copy + Eq + Hash,
    E: MachineEvent,
{
    pub fn new(initial: S, context: C) -> Self {
        Self {
            initial,
            context,
            states: HashMap::new(),
            on_transition: None,
            on_error: None,
        }
    }

    /// 从指定状态启动（恢复会话时使用）
    pub fn starting_at(mut self, state: S) -> Self {
        self.initial = state;
        self
    }

    pub fn with_context(mut self, context: C) -> Self {
        self.context = context;
        self
    }

    pub fn state(mut self, state: S, node: StateNode<S, C, E>) -> Self {
        self.states.insert(state, node);
        self
    }

    pub fn on_transition(mut self, hook: impl Fn(S, S, &E) + Send + Sync + 'static) -> Self {
        self.on_transition = Some(Arc::new(hook));
        self
    }

    pub fn on_error(
        mut self,
        hook: impl Fn(&anyhow::Error, S, &E) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

/// `send` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome<S> {
    Transitioned { from: S, to: S },
    /// 当前状态不接受该事件或守卫未通过，状态和上下文都未改变
    Ignored,
    /// 动作出错，已执行部分的上下文修改已提交
    ActionFailed,
}

impl<S> SendOutcome<S> {
    pub fn is_transitioned(&self) -> bool {
        matches!(self, SendOutcome::Transitioned { .. })
    }
}

pub struct StateMachine<S, C, E: MachineEvent> {
    current: S,
    context: Arc<C>,
    states: HashMap<S, StateNode<S, C, E>>,
    on_transition: Option<TransitionHook<S, E>>,
    on_error: Option<ErrorHook<S, E>>,
}

impl<S, C, E> StateMachine<S, C, E>
where
    S: Copy + Eq + Hash + Debug + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    E: MachineEvent,
{
    pub fn new(config: MachineConfig<S, C, E>) -> Self {
        Self {
            current: config.initial,
            context: Arc::new(config.context),
            states: config.states,
            on_transition: config.on_transition,
            on_error: config.on_error,
        }
    }

    pub async fn send(&mut self, event: E) -> SendOutcome<S> {
        let from = self.current;

        let Some((target, actions)) = self.select_transition(&event) else {
            tracing::trace!(state = ?from, event = ?event.kind(), "event ignored");
            return SendOutcome::Ignored;
        };

        let mut working = (*self.context).clone();

        if let Err(e) = run_actions(&actions, &mut working, &event).await {
            self.context = Arc::new(working);
            self.report_error(&e, from, &event);
            return SendOutcome::ActionFailed;
        }

        self.current = target;

        if target != from {
            let entry = self
                .states
                .get(&target)
                .map(|node| node.entry.clone())
                .unwrap_or_default();

            if let Err(e) = run_actions(&entry, &mut working, &event).await {
                self.context = Arc::new(working);
                self.report_error(&e, target, &event);
                return SendOutcome::ActionFailed;
            }
        }

        self.context = Arc::new(working);

        if let Some(hook) = &self.on_transition {
            hook(from, target, &event);
        }

        SendOutcome::Transitioned { from, to: target }
    }

    pub fn state(&self) -> S {
        self.current
    }

    /// 当前上下文快照
    pub fn context(&self) -> Arc<C> {
        self.context.clone()
    }

    pub fn matches(&self, state: S) -> bool {
        self.current == state
    }

    /// 当前状态是否定义了该事件类型（不求值守卫）
    pub fn can(&self, kind: E::Kind) -> bool {
        self.states
            .get(&self.current)
            .is_some_and(|node| node.on.contains_key(&kind))
    }

    /// 当前状态下该事件是否会触发转换（求值守卫）
    pub fn accepts(&self, event: &E) -> bool {
        self.select_transition(event).is_some()
    }

    /// 在转换之外产生新的上下文值
    pub fn update_context(&mut self, update: impl FnOnce(&mut C)) {
        let mut working = (*self.context).clone();
        update(&mut working);
        self.context = Arc::new(working);
    }

    fn select_transition(&self, event: &E) -> Option<(S, Vec<Action<C, E>>)> {
        let candidates = self.states.get(&self.current)?.on.get(&event.kind())?;

        candidates
            .iter()
            .find(|t| t.guard.as_ref().map_or(true, |g| g(&*self.context, event)))
            .map(|t| (t.target, t.actions.clone()))
    }

    fn report_error(&self, error: &anyhow::Error, state: S, event: &E) {
        match &self.on_error {
            Some(hook) => hook(error, state, event),
            None => tracing::error!(state = ?state, event = ?event.kind(), error = %error, "state machine action failed"),
        }
    }
}

async fn run_actions<C, E>(
    actions: &[Action<C, E>],
    context: &mut C,
    event: &E,
) -> anyhow::Result<()>
where
    C: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    for action in actions {
        match action {
            Action::Sync(f) => f(context, event)?,
            Action::Async(f) => {
                *context = f(context.clone(), event.clone()).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Door {
        Closed,
        Open,
        Locked,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum DoorEventKind {
        Open,
        Close,
        Lock,
        Kick,
    }

    #[derive(Debug, Clone)]
    enum DoorEvent {
        Open,
        Close,
        Lock { code: u32 },
        Kick,
    }

    impl MachineEvent for DoorEvent {
        type Kind = DoorEventKind;

        fn kind(&self) -> DoorEventKind {
            match self {
                DoorEvent::Open => DoorEventKind::Open,
                DoorEvent::Close => DoorEventKind::Close,
                DoorEvent::Lock { .. } => DoorEventKind::Lock,
                DoorEvent::Kick => DoorEventKind::Kick,
            }
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct DoorContext {
        opened: u32,
        code: Option<u32>,
        log: Vec<&'static str>,
    }

    fn door_machine() -> StateMachine<Door, DoorContext, DoorEvent> {
        let config = MachineConfig::new(Door::Closed, DoorContext::default())
            .state(
                Door::Closed,
                StateNode::new()
                    .on(
                        DoorEventKind::Open,
                        Transition::to(Door::Open).action(|ctx: &mut DoorContext, _| {
                            ctx.opened += 1;
                            Ok(())
                        }),
                    )
                    // 第一个候选：code 为 0 时走到 Open
                    .on(
                        DoorEventKind::Lock,
                        Transition::to(Door::Open)
                            .guard(|_, e: &DoorEvent| matches!(e, DoorEvent::Lock { code: 0 })),
                    )
                    .on(
                        DoorEventKind::Lock,
                        Transition::to(Door::Locked)
                            .guard(|_, e: &DoorEvent| matches!(e, DoorEvent::Lock { code } if *code > 0))
                            .action(|ctx: &mut DoorContext, e: &DoorEvent| {
                                if let DoorEvent::Lock { code } = e {
                                    ctx.code = Some(*code);
                                }
                                Ok(())
                            }),
                    )
                    // 同时满足时不会走到这里
                    .on(DoorEventKind::Lock, Transition::to(Door::Closed)),
            )
            .state(
                Door::Open,
                StateNode::new()
                    .entry(|ctx: &mut DoorContext, _| {
                        ctx.log.push("entered open");
                        Ok(())
                    })
                    .on(DoorEventKind::Close, Transition::to(Door::Closed))
                    .on(
                        DoorEventKind::Kick,
                        Transition::to(Door::Closed)
                            .action(|ctx: &mut DoorContext, _| {
                                ctx.log.push("first");
                                Ok(())
                            })
                            .action(|_, _| Err(anyhow::anyhow!("hinge broke")))
                            .action(|ctx: &mut DoorContext, _| {
                                ctx.log.push("never");
                                Ok(())
                            }),
                    )
                    .on(
                        DoorEventKind::Open,
                        Transition::to(Door::Open).async_action(
                            |mut ctx: DoorContext, _| async move {
                                tokio::task::yield_now().await;
                                ctx.log.push("async");
                                Ok(ctx)
                            },
                        ),
                    ),
            );

        StateMachine::new(config)
    }

    #[tokio::test]
    async fn test_basic_transition_and_actions() {
        let mut machine = door_machine();
        let before = machine.context();

        let outcome = machine.send(DoorEvent::Open).await;
        assert_eq!(
            outcome,
            SendOutcome::Transitioned {
                from: Door::Closed,
                to: Door::Open
            }
        );
        assert!(machine.matches(Door::Open));
        assert_eq!(machine.context().opened, 1);
        assert_eq!(machine.context().log, vec!["entered open"]);

        // 旧快照不受影响
        assert_eq!(before.opened, 0);
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        tokio_test::block_on(async {
            let mut machine = door_machine();
            let before = machine.context();

            assert_eq!(machine.send(DoorEvent::Close).await, SendOutcome::Ignored);
            assert_eq!(machine.send(DoorEvent::Kick).await, SendOutcome::Ignored);
            assert_eq!(machine.state(), Door::Closed);
            assert!(Arc::ptr_eq(&before, &machine.context()));
        });
    }

    #[tokio::test]
    async fn test_first_passing_guard_wins() {
        let mut machine = door_machine();
        machine.send(DoorEvent::Lock { code: 42 }).await;
        assert_eq!(machine.state(), Door::Locked);
        assert_eq!(machine.context().code, Some(42));

        let mut machine = door_machine();
        machine.send(DoorEvent::Lock { code: 0 }).await;
        assert_eq!(machine.state(), Door::Open);
    }

    #[tokio::test]
    async fn test_action_failure_keeps_partial_context_and_state() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();

        let mut machine = door_machine();
        machine.on_error = Some(Arc::new(move |e: &anyhow::Error, state: Door, _: &DoorEvent| {
            sink.lock().unwrap().push(format!("{:?}: {}", state, e));
        }));

        machine.send(DoorEvent::Open).await;
        let outcome = machine.send(DoorEvent::Kick).await;

        assert_eq!(outcome, SendOutcome::ActionFailed);
        assert_eq!(machine.state(), Door::Open);
        assert_eq!(machine.context().log, vec!["entered open", "first"]);
        assert_eq!(errors.lock().unwrap().as_slice(), ["Open: hinge broke"]);
    }

    #[tokio::test]
    async fn test_async_action_and_self_transition() {
        let mut machine = door_machine();
        machine.send(DoorEvent::Open).await;

        let outcome = machine.send(DoorEvent::Open).await;
        assert!(outcome.is_transitioned());
        // 自转换不重新执行进入动作
        assert_eq!(machine.context().log, vec!["entered open", "async"]);
    }

    #[tokio::test]
    async fn test_transition_hook_and_predicates() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut machine = door_machine();
        machine.on_transition = Some(Arc::new(move |from: Door, to: Door, e: &DoorEvent| {
            sink.lock().unwrap().push((from, to, e.kind()));
        }));

        assert!(machine.can(DoorEventKind::Lock));
        assert!(!machine.can(DoorEventKind::Close));
        assert!(machine.accepts(&DoorEvent::Open));

        machine.send(DoorEvent::Open).await;
        machine.send(DoorEvent::Close).await;

        assert_eq!(
            seen.lock().unwrap().as_slice(),
            [
                (Door::Closed, Door::Open, DoorEventKind::Open),
                (Door::Open, Door::Closed, DoorEventKind::Close),
            ]
        );
    }

    #[test]
    fn test_update_context_produces_new_value() {
        let mut machine = door_machine();
        let before = machine.context();

        machine.update_context(|ctx| ctx.code = Some(7));

        assert_eq!(before.code, None);
        assert_eq!(machine.context().code, Some(7));
        assert_eq!(machine.state(), Door::Closed);
    }
}
