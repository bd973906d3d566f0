//! Shared test utilities: an in-memory managed runtime.
//!
//! `MockRuntime` keeps objects in a table keyed by compressed reference. With the moving
//! collector enabled, every allocation and every class initializer run relocates every object
//! to a fresh id and updates handles and array elements, so a raw reference held across an allocation becomes stale and
//! any later use of it panics.

use std::alloc::{alloc_zeroed, Layout};
use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;
use std::sync::{Arc, Mutex, MutexGuard, Once};
use std::thread::ThreadId;

use crate::arch::Architecture;
use crate::descriptor::{access, DescriptorLayout, MethodDescriptor, MethodRef};
use crate::error::{InvokeError, RuntimeError};
use crate::interceptor::dispatch::quick_dispatch_entry;
use crate::interceptor::invocation::CallFrame;
use crate::interceptor::registry;
use crate::interceptor::visitor::CallingConventionVisitor;
use crate::runtime::{HandleId, HandleKind, ManagedRuntime};
use crate::types::{ClassRef, ObjectRef, TypeTag, Value};

static LOG_INIT: Once = Once::new();

/// Route `log` output through the test harness (once per process).
pub fn init_logging() {
    LOG_INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

const fn class_id(raw: u32) -> ClassRef {
    match ClassRef::from_raw(raw) {
        Some(c) => c,
        None => panic!("class ids start at 1"),
    }
}

pub const OBJECT_CLASS: ClassRef = class_id(1);
pub const STRING_CLASS: ClassRef = class_id(2);
pub const METHOD_CLASS: ClassRef = class_id(3);
pub const THROWABLE_CLASS: ClassRef = class_id(4);
pub const OBJECT_ARRAY_CLASS: ClassRef = class_id(13);

/// Wrapper classes, in `TypeTag` order from boolean to double.
const WRAPPERS: [(&str, TypeTag); 8] = [
    ("java.lang.Boolean", TypeTag::Boolean),
    ("java.lang.Byte", TypeTag::Byte),
    ("java.lang.Character", TypeTag::Char),
    ("java.lang.Short", TypeTag::Short),
    ("java.lang.Integer", TypeTag::Int),
    ("java.lang.Long", TypeTag::Long),
    ("java.lang.Float", TypeTag::Float),
    ("java.lang.Double", TypeTag::Double),
];

/// Extra bytes the mock runtime allocates after every descriptor.
pub const DESCRIPTOR_TRAILING_BYTES: usize = 24;
pub const TRAILING_FILL: u8 = 0xA5;

/// Fake compiled-code address of the `n`th method.
pub fn compiled_entry(n: u32) -> usize {
    0x7100_0000 + n as usize * 0x40
}

type ReflectHook = Box<dyn Fn(MethodRef) -> Result<(), RuntimeError> + Send + Sync>;

pub type MethodBody =
    Arc<dyn Fn(&MockRuntime, Option<ObjectRef>, &[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

struct ClassInfo {
    name: String,
    superclass: Option<ClassRef>,
    interfaces: Vec<ClassRef>,
    is_interface: bool,
    initialized: bool,
    init_fails: bool,
    init_count: usize,
}

enum Object {
    Instance(ClassRef),
    Str(String),
    Boxed(Value),
    Array(Vec<Option<ObjectRef>>),
    Reflected(MethodRef),
    Throwable(String),
}

struct MethodInfo {
    class: ClassRef,
    name: String,
    signature: String,
    param_classes: Vec<Option<ClassRef>>,
    return_class: Option<ClassRef>,
    body: MethodBody,
    live: MethodRef,
    calls: usize,
}

struct State {
    classes: Vec<ClassInfo>,
    objects: HashMap<u32, Object>,
    next_object: u32,
    handles: HashMap<u64, (Option<ObjectRef>, HandleKind)>,
    next_handle: u64,
    moving_gc: bool,
    collections: usize,
    methods: Vec<MethodInfo>,
}

impl State {
    fn class(&self, class: ClassRef) -> &ClassInfo {
        &self.classes[class.raw() as usize - 1]
    }

    fn class_mut(&mut self, class: ClassRef) -> &mut ClassInfo {
        &mut self.classes[class.raw() as usize - 1]
    }

    fn object(&self, obj: ObjectRef) -> &Object {
        self.objects
            .get(&obj.raw())
            .unwrap_or_else(|| panic!("stale or unknown reference {obj:?}"))
    }

    fn find_class(&self, name: &str) -> Option<ClassRef> {
        self.classes
            .iter()
            .position(|c| c.name == name)
            .and_then(|i| ClassRef::from_raw(i as u32 + 1))
    }

    fn add_class(&mut self, name: &str, superclass: Option<ClassRef>, is_interface: bool) -> ClassRef {
        self.classes.push(ClassInfo {
            name: name.to_string(),
            superclass,
            interfaces: Vec::new(),
            is_interface,
            initialized: false,
            init_fails: false,
            init_count: 0,
        });
        class_id(self.classes.len() as u32)
    }

    fn is_assignable(&self, from: ClassRef, to: ClassRef) -> bool {
        let mut cur = Some(from);
        while let Some(c) = cur {
            let info = self.class(c);
            if c == to || info.interfaces.contains(&to) {
                return true;
            }
            cur = info.superclass;
        }
        false
    }

    fn method_index(&self, method: MethodRef) -> usize {
        let code_item = method.descriptor().code_item;
        assert!(
            code_item >= 1 && code_item <= self.methods.len(),
            "{method:?} is not a mock method"
        );
        code_item - 1
    }

    /// Relocates every object to a fresh id.
    fn collect(&mut self) {
        self.collections += 1;
        let old = std::mem::take(&mut self.objects);
        let mut ids: Vec<u32> = old.keys().copied().collect();
        ids.sort_unstable();
        let mut remap = HashMap::with_capacity(ids.len());
        for id in ids {
            remap.insert(id, self.next_object);
            self.next_object += 1;
        }
        let moved = |r: ObjectRef| ObjectRef::from_raw(remap[&r.raw()]);
        for (id, mut obj) in old {
            if let Object::Array(elems) = &mut obj {
                for e in elems.iter_mut() {
                    *e = e.and_then(moved);
                }
            }
            self.objects.insert(remap[&id], obj);
        }
        for (target, _) in self.handles.values_mut() {
            *target = target.and_then(moved);
        }
    }

    fn alloc(&mut self, obj: Object) -> ObjectRef {
        if self.moving_gc {
            self.collect();
        }
        let id = self.next_object;
        self.next_object += 1;
        self.objects.insert(id, obj);
        ObjectRef::from_raw(id).unwrap_or_else(|| unreachable!("object ids start above zero"))
    }
}

pub struct MockRuntime {
    arch: Architecture,
    layout: DescriptorLayout,
    state: Mutex<State>,
    pending: Mutex<HashMap<ThreadId, InvokeError>>,
    raised: Mutex<Vec<InvokeError>>,
    reflect_hook: Mutex<Option<ReflectHook>>,
}

impl MockRuntime {
    pub fn new(arch: Architecture) -> MockRuntime {
        init_logging();
        let mut st = State {
            classes: Vec::new(),
            objects: HashMap::new(),
            next_object: 0x1000,
            handles: HashMap::new(),
            next_handle: 1,
            moving_gc: false,
            collections: 0,
            methods: Vec::new(),
        };
        st.add_class("java.lang.Object", None, false);
        st.add_class("java.lang.String", Some(OBJECT_CLASS), false);
        st.add_class("java.lang.reflect.Method", Some(OBJECT_CLASS), false);
        st.add_class("java.lang.Throwable", Some(OBJECT_CLASS), false);
        for (name, _) in WRAPPERS {
            st.add_class(name, Some(OBJECT_CLASS), false);
        }
        st.add_class("java.lang.Object[]", Some(OBJECT_CLASS), false);
        for c in st.classes.iter_mut() {
            c.initialized = true;
        }
        MockRuntime {
            arch,
            layout: DescriptorLayout::compiled().with_trailing_bytes(DESCRIPTOR_TRAILING_BYTES),
            state: Mutex::new(st),
            pending: Mutex::new(HashMap::new()),
            raised: Mutex::new(Vec::new()),
            reflect_hook: Mutex::new(None),
        }
    }

    /// Reports `layout` instead of the compiled-in one.
    pub fn with_layout(mut self, layout: DescriptorLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn arch(&self) -> Architecture {
        self.arch
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_moving_gc(&self, enabled: bool) {
        self.state().moving_gc = enabled;
    }

    pub fn collections(&self) -> usize {
        self.state().collections
    }

    // ── classes ──

    pub fn define_class(&self, name: &str, superclass: Option<ClassRef>) -> ClassRef {
        self.state().add_class(name, superclass, false)
    }

    pub fn define_interface(&self, name: &str) -> ClassRef {
        self.state().add_class(name, None, true)
    }

    pub fn implement(&self, class: ClassRef, interface: ClassRef) {
        self.state().class_mut(class).interfaces.push(interface);
    }

    pub fn set_init_fails(&self, class: ClassRef, fails: bool) {
        self.state().class_mut(class).init_fails = fails;
    }

    pub fn init_count(&self, class: ClassRef) -> usize {
        self.state().class(class).init_count
    }

    // ── methods ──

    /// Defines a method whose shorty and parameter classes are derived from `signature`.
    pub fn define_method(
        &self,
        class: ClassRef,
        name: &str,
        signature: &str,
        flags: u32,
        body: impl Fn(&MockRuntime, Option<ObjectRef>, &[Value]) -> Result<Value, RuntimeError>
            + Send
            + Sync
            + 'static,
    ) -> MethodRef {
        let mut st = self.state();
        let (shorty, param_classes, return_class) = parse_signature(&st, signature);
        let n = st.methods.len() as u32 + 1;
        let is_static = flags & access::STATIC != 0;
        let ins: u16 = shorty[1..]
            .bytes()
            .map(|c| if c == b'J' || c == b'D' { 2 } else { 1 })
            .sum::<u16>()
            + u16::from(!is_static);
        let shorty: &'static str = Box::leak(shorty.into_boxed_str());

        let size = self.layout.descriptor_size.max(core::mem::size_of::<MethodDescriptor>());
        let layout = Layout::from_size_align(size, DescriptorLayout::alignment()).unwrap();
        let live = unsafe {
            let ptr = alloc_zeroed(layout) as *mut MethodDescriptor;
            assert!(!ptr.is_null());
            ptr.write(MethodDescriptor::new(
                class,
                flags,
                n,
                1000 + n,
                shorty,
                ins + 4,
                ins,
                n as usize,
                compiled_entry(n),
            ));
            if flags & access::NATIVE != 0 {
                (*ptr)
                    .native_data
                    .store(0x7200_0000 + n as usize, std::sync::atomic::Ordering::Release);
            }
            let base = core::mem::size_of::<MethodDescriptor>();
            core::ptr::write_bytes((ptr as *mut u8).add(base), TRAILING_FILL, size - base);
            MethodRef::from_raw(ptr).unwrap()
        };

        st.methods.push(MethodInfo {
            class,
            name: name.to_string(),
            signature: signature.to_string(),
            param_classes,
            return_class,
            body: Arc::new(body),
            live,
            calls: 0,
        });
        live
    }

    /// Clears the declaring class of `method`, as for a method whose class failed to load.
    pub fn detach_from_class(&self, method: MethodRef) {
        let _st = self.state();
        // SAFETY: descriptors are allocated and owned by this runtime; no reference into the
        // descriptor is held across this write.
        unsafe {
            let ptr = method.as_ptr() as *mut MethodDescriptor;
            core::ptr::addr_of_mut!((*ptr).declaring_class).write(0);
        }
    }

    /// Times the body of `method` (or of a copy of it) ran.
    pub fn body_calls(&self, method: MethodRef) -> usize {
        let st = self.state();
        st.methods[st.method_index(method)].calls
    }

    /// Runs `hook` at the start of every `reflect_method`, failing the call if it fails.
    pub fn on_reflect(
        &self,
        hook: impl Fn(MethodRef) -> Result<(), RuntimeError> + Send + Sync + 'static,
    ) {
        *self.reflect_hook.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(hook));
    }

    // ── objects ──

    pub fn new_instance(&self, class: ClassRef) -> ObjectRef {
        self.state().alloc(Object::Instance(class))
    }

    pub fn new_string(&self, s: &str) -> ObjectRef {
        self.state().alloc(Object::Str(s.to_string()))
    }

    pub fn string_of(&self, obj: ObjectRef) -> Option<String> {
        match self.state().object(obj) {
            Object::Str(s) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn message_of(&self, obj: ObjectRef) -> Option<String> {
        match self.state().object(obj) {
            Object::Throwable(m) => Some(m.clone()),
            _ => None,
        }
    }

    pub fn new_throwable(&self, message: &str) -> ObjectRef {
        self.state().alloc(Object::Throwable(message.to_string()))
    }

    pub fn boxed(&self, value: Value) -> ObjectRef {
        self.box_primitive(value).unwrap()
    }

    pub fn reflected_method(&self, obj: ObjectRef) -> Option<MethodRef> {
        match self.state().object(obj) {
            Object::Reflected(m) => Some(*m),
            _ => None,
        }
    }

    pub fn live_handles(&self, kind: HandleKind) -> usize {
        self.state().handles.values().filter(|(_, k)| *k == kind).count()
    }

    // ── calls ──

    /// Calls `method` the way compiled code would: through its current entry point.
    pub fn call(
        &self,
        method: MethodRef,
        receiver: Option<ObjectRef>,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        self.invoke_method(method, receiver, args)
    }

    /// Every error raised through [`ManagedRuntime::raise`] so far.
    pub fn raised(&self) -> Vec<InvokeError> {
        self.raised.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Builds a callee-save frame for `method`, stores the arguments where the quick ABI puts
    /// them, and enters the hook trampoline.
    fn call_through_trampoline(
        &self,
        method: MethodRef,
        receiver: Option<ObjectRef>,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let desc = method.descriptor();
        let shorty = desc.shorty().unwrap();
        assert_eq!(args.len(), shorty.params().len(), "argument count for {method:?}");

        let is_static = desc.is_static();
        let slots = CallingConventionVisitor::new(self.arch).visit(&shorty, is_static);
        let size = CallFrame::required_size(self.arch.abi(), &slots);
        let mut mem = vec![0u64; size.div_ceil(8) + 1];
        let sp = mem.as_mut_ptr() as *mut u8;
        {
            let mut frame = unsafe { CallFrame::from_raw(sp, self.arch) };
            let receiver = (!is_static).then_some(Value::Reference(receiver));
            for (slot, value) in slots.iter().zip(receiver.into_iter().chain(args.iter().copied())) {
                frame.write_raw(slot, value.to_raw());
            }
        }

        let raw = unsafe { quick_dispatch_entry(method.as_ptr(), sp) };
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&std::thread::current().id());
        match pending {
            Some(err) => Err(self.exception_for(err)),
            None => Ok(Value::from_raw(shorty.return_type(), raw)),
        }
    }

    fn exception_for(&self, err: InvokeError) -> RuntimeError {
        match err {
            InvokeError::Handler(obj) | InvokeError::Runtime(RuntimeError::Exception(obj)) => {
                RuntimeError::Exception(obj)
            }
            other => RuntimeError::Exception(self.new_throwable(&other.to_string())),
        }
    }
}

fn parse_type(st: &State, signature: &str, chars: &mut Peekable<Chars<'_>>) -> (char, Option<ClassRef>) {
    match chars.next() {
        Some('L') => {
            let name: String = chars.by_ref().take_while(|&c| c != ';').collect();
            let class = st.find_class(&name.replace('/', ".")).unwrap_or(OBJECT_CLASS);
            ('L', Some(class))
        }
        Some('[') => {
            while chars.peek() == Some(&'[') {
                chars.next();
            }
            if chars.next() == Some('L') {
                chars.by_ref().take_while(|&c| c != ';').for_each(drop);
            }
            ('L', Some(OBJECT_ARRAY_CLASS))
        }
        Some(c) => (c, None),
        None => panic!("truncated signature {signature}"),
    }
}

/// Shorty, parameter classes and return class of a JVM method signature.
fn parse_signature(st: &State, signature: &str) -> (String, Vec<Option<ClassRef>>, Option<ClassRef>) {
    let (params, ret) = signature
        .strip_prefix('(')
        .and_then(|s| s.split_once(')'))
        .unwrap_or_else(|| panic!("bad signature {signature}"));

    let (ret_char, return_class) = parse_type(st, signature, &mut ret.chars().peekable());
    let mut shorty = String::from(ret_char);
    let mut classes = Vec::new();
    let mut chars = params.chars().peekable();
    while chars.peek().is_some() {
        let (c, class) = parse_type(st, signature, &mut chars);
        shorty.push(c);
        classes.push(class);
    }
    (shorty, classes, return_class)
}

impl ManagedRuntime for MockRuntime {
    fn descriptor_layout(&self) -> DescriptorLayout {
        self.layout
    }

    fn resolve_method(&self, class: ClassRef, name: &str, signature: &str) -> Option<MethodRef> {
        let st = self.state();
        let mut cur = Some(class);
        while let Some(c) = cur {
            if let Some(m) = st
                .methods
                .iter()
                .find(|m| m.class == c && m.name == name && m.signature == signature)
            {
                return Some(m.live);
            }
            cur = st.class(c).superclass;
        }
        None
    }

    fn initialize_class(&self, class: ClassRef) -> Result<(), RuntimeError> {
        let mut st = self.state();
        if st.class(class).initialized {
            return Ok(());
        }
        // The initializer allocates.
        if st.moving_gc {
            st.collect();
        }
        let info = st.class_mut(class);
        info.init_count += 1;
        if info.init_fails {
            return Err(RuntimeError::ClassInitFailed {
                class: info.name.clone(),
            });
        }
        info.initialized = true;
        Ok(())
    }

    fn is_initialized(&self, class: ClassRef) -> bool {
        self.state().class(class).initialized
    }

    fn class_of(&self, obj: ObjectRef) -> ClassRef {
        match self.state().object(obj) {
            Object::Instance(c) => *c,
            Object::Str(_) => STRING_CLASS,
            Object::Boxed(v) => {
                let i = WRAPPERS
                    .iter()
                    .position(|(_, t)| *t == v.tag())
                    .unwrap_or_else(|| panic!("boxed non-primitive {v:?}"));
                class_id(5 + i as u32)
            }
            Object::Array(_) => OBJECT_ARRAY_CLASS,
            Object::Reflected(_) => METHOD_CLASS,
            Object::Throwable(_) => THROWABLE_CLASS,
        }
    }

    fn superclass(&self, class: ClassRef) -> Option<ClassRef> {
        self.state().class(class).superclass
    }

    fn is_interface(&self, class: ClassRef) -> bool {
        self.state().class(class).is_interface
    }

    fn is_instance_of(&self, obj: ObjectRef, class: ClassRef) -> bool {
        let from = self.class_of(obj);
        self.state().is_assignable(from, class)
    }

    fn class_name(&self, class: ClassRef) -> String {
        self.state().class(class).name.clone()
    }

    fn method_name(&self, method: MethodRef) -> String {
        let st = self.state();
        st.methods[st.method_index(method)].name.clone()
    }

    fn method_signature(&self, method: MethodRef) -> String {
        let st = self.state();
        st.methods[st.method_index(method)].signature.clone()
    }

    fn parameter_class(&self, method: MethodRef, index: usize) -> Option<ClassRef> {
        let st = self.state();
        st.methods[st.method_index(method)]
            .param_classes
            .get(index)
            .copied()
            .flatten()
    }

    fn return_class(&self, method: MethodRef) -> Option<ClassRef> {
        let st = self.state();
        st.methods[st.method_index(method)].return_class
    }

    fn reflect_method(&self, method: MethodRef) -> Result<ObjectRef, RuntimeError> {
        if let Some(hook) = self.reflect_hook.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            hook(method)?;
        }
        Ok(self.state().alloc(Object::Reflected(method)))
    }

    fn box_primitive(&self, value: Value) -> Result<ObjectRef, RuntimeError> {
        assert!(value.tag().is_primitive(), "boxing {value:?}");
        Ok(self.state().alloc(Object::Boxed(value)))
    }

    fn unbox_primitive(&self, obj: ObjectRef) -> Option<Value> {
        match self.state().object(obj) {
            Object::Boxed(v) => Some(*v),
            _ => None,
        }
    }

    fn allocate_object_array(&self, len: usize) -> Result<ObjectRef, RuntimeError> {
        Ok(self.state().alloc(Object::Array(vec![None; len])))
    }

    fn array_length(&self, array: ObjectRef) -> usize {
        match self.state().object(array) {
            Object::Array(e) => e.len(),
            _ => panic!("{array:?} is not an array"),
        }
    }

    fn array_element(&self, array: ObjectRef, index: usize) -> Option<ObjectRef> {
        match self.state().object(array) {
            Object::Array(e) => e[index],
            _ => panic!("{array:?} is not an array"),
        }
    }

    fn set_array_element(&self, array: ObjectRef, index: usize, value: Option<ObjectRef>) {
        let mut st = self.state();
        if let Some(v) = value {
            st.object(v);
        }
        match st.objects.get_mut(&array.raw()) {
            Some(Object::Array(e)) => e[index] = value,
            _ => panic!("{array:?} is not a live array"),
        }
    }

    fn new_handle(&self, obj: Option<ObjectRef>, kind: HandleKind) -> HandleId {
        let mut st = self.state();
        if let Some(o) = obj {
            st.object(o);
        }
        let id = st.next_handle;
        st.next_handle += 1;
        st.handles.insert(id, (obj, kind));
        HandleId(id)
    }

    fn resolve_handle(&self, handle: HandleId) -> Option<ObjectRef> {
        self.state()
            .handles
            .get(&handle.0)
            .unwrap_or_else(|| panic!("released handle {handle:?}"))
            .0
    }

    fn release_handle(&self, handle: HandleId) {
        self.state().handles.remove(&handle.0);
    }

    fn invoke_method(
        &self,
        method: MethodRef,
        receiver: Option<ObjectRef>,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        if registry::is_hooked(method) {
            return self.call_through_trampoline(method, receiver, args);
        }
        let desc = method.descriptor();
        if desc.is_static() {
            if let Some(class) = desc.declaring_class() {
                self.initialize_class(class)?;
            }
        }
        let body = {
            let mut st = self.state();
            let i = st.method_index(method);
            st.methods[i].calls += 1;
            Arc::clone(&st.methods[i].body)
        };
        body(self, receiver, args)
    }

    fn raise(&self, error: &InvokeError) {
        self.raised
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(error.clone());
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(std::thread::current().id(), error.clone());
    }
}
