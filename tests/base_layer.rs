use std::error::Error;

use dygraph::{
    AsLayer, DataType, Layer, LayerError, Module, Param, ParamAttr, Shape, StateDict, Tensor,
    Value,
    layer::ErrorKind,
    loom::init::Constant,
};
use itertools::Itertools;

#[derive(AsLayer)]
struct L1 {
    #[layer]
    layer: Layer,
}

impl L1 {
    fn new() -> Result<Self, LayerError> {
        let mut layer = Layer::of::<Self>();
        let attr = ParamAttr::default().with_initializer(Constant::new(0.1));
        layer.create_parameter("w1", [2, 2], Some(DataType::F32), &attr, false)?;
        layer.create_parameter("w2", [2, 2], Some(DataType::F32), &attr, false)?;
        Ok(Self { layer })
    }
}

impl Module for L1 {
    fn forward(&self, _inputs: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        let w1 = self.layer.parameter("w1").ok_or_else(|| LayerError::NotFound("w1".into()))?;
        let w2 = self.layer.parameter("w2").ok_or_else(|| LayerError::NotFound("w2".into()))?;
        Ok(vec![w1.try_add(w2)?])
    }
}

/// Sums the outputs of its two sublayers.
#[derive(AsLayer)]
struct Pair(Layer);

impl Pair {
    fn new(scope: &str, first: impl Module, second: impl Module) -> Result<Self, LayerError> {
        let mut layer = Layer::new(scope);
        layer.set_sublayer("layer1", first)?;
        layer.set_sublayer("layer2", second)?;
        Ok(Self(layer))
    }
}

impl Module for Pair {
    fn forward(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        let x = self.0.call_sublayer("layer1", inputs)?;
        let y = self.0.call_sublayer("layer2", inputs)?;
        Ok(vec![&x[0] + &y[0]])
    }
}

fn l2() -> Result<Pair, LayerError> {
    Pair::new("l2", L1::new()?, L1::new()?)
}

fn l3() -> Result<Pair, LayerError> {
    Pair::new("l3", l2()?, l2()?)
}

fn names<T>(entries: Vec<(String, T)>) -> Vec<String> {
    entries.into_iter().map(|(name, _)| name).collect()
}

fn all_close(tensor: &Tensor, value: f64) -> bool {
    tensor.to_f64().iter().all(|x| (x - value).abs() < 1e-5)
}

#[test]
fn test_one_level() -> Result<(), Box<dyn Error>> {
    let l1 = L1::new()?;
    assert_eq!(l1.layer().name_scope(), "l1");

    let ret = l1.call(&[])?;
    assert_eq!(
        names(l1.layer().named_parameters("l1", true)),
        ["l1.w1", "l1.w2"]
    );
    assert!(all_close(&ret[0], 0.2));
    Ok(())
}

#[test]
fn test_three_level() -> Result<(), Box<dyn Error>> {
    let l3 = l3()?;
    let expected = [
        "l3.layer1.layer1.w1",
        "l3.layer1.layer1.w2",
        "l3.layer1.layer2.w1",
        "l3.layer1.layer2.w2",
        "l3.layer2.layer1.w1",
        "l3.layer2.layer1.w2",
        "l3.layer2.layer2.w1",
        "l3.layer2.layer2.w2",
    ];
    assert_eq!(names(l3.layer().named_parameters("l3", true)), expected);

    let ret = l3.call(&[])?;
    assert_eq!(ret[0].shape(), Shape::from([2, 2]));
    assert!(all_close(&ret[0], 0.8));

    let l1 = l3
        .layer()
        .sublayer("layer1")
        .and_then(|l2| l2.layer().sublayer_as::<L1>("layer2"));
    assert!(l1.is_some());
    Ok(())
}

#[test]
fn test_display() -> Result<(), Box<dyn Error>> {
    let l2 = l2()?;
    assert_eq!(
        l2.layer().to_string(),
        "l2(\n  (layer1): l1()\n  (layer2): l1()\n)"
    );
    Ok(())
}

#[derive(AsLayer)]
struct BufferLayer(Layer);

impl BufferLayer {
    fn new() -> Result<Self, LayerError> {
        let mut layer = Layer::of::<Self>();
        layer.register_buffer("layer_buffer", Tensor::zeros([2, 4], DataType::I32))?;
        Ok(Self(layer))
    }
}

impl Module for BufferLayer {
    fn forward(&self, _inputs: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        Ok(vec![])
    }
}

#[derive(AsLayer)]
struct BufferNet(Layer);

impl BufferNet {
    fn new() -> Result<Self, Box<dyn Error>> {
        let mut layer = Layer::of::<Self>();
        layer.set_sublayer("buffer_layer", BufferLayer::new()?)?;
        layer.create_parameter("w1", [2, 2], None, &ParamAttr::default(), false)?;
        layer.register_buffer("net_buffer", Tensor::create([2, 4], vec![1i32; 8])?)?;
        layer.assign("new_buffer", Tensor::create([2, 4], vec![1i32; 8])?)?;
        Ok(Self(layer))
    }
}

impl Module for BufferNet {
    fn forward(&self, _inputs: &[Tensor]) -> Result<Vec<Tensor>, LayerError> {
        Ok(vec![])
    }
}

#[test]
fn test_buffers_and_named_buffers() -> Result<(), Box<dyn Error>> {
    let net = BufferNet::new()?;
    let layer = net.layer();
    assert_eq!(layer.name_scope(), "buffer_net");

    assert_eq!(layer.buffers(true).len(), 3);
    assert_eq!(
        names(layer.named_buffers("", true)),
        ["net_buffer", "new_buffer", "buffer_layer.layer_buffer"]
    );
    assert_eq!(layer.buffers(false).len(), 2);
    assert_eq!(
        names(layer.named_buffers("", false)),
        ["net_buffer", "new_buffer"]
    );

    // the implicitly assigned buffer does not persist
    assert_eq!(
        layer.state_dict().keys().collect_vec(),
        ["w1", "net_buffer", "buffer_layer.layer_buffer"]
    );
    Ok(())
}

#[test]
fn test_register_buffer_with_error() -> Result<(), Box<dyn Error>> {
    let mut net = Layer::default();
    let var = Tensor::zeros([1], DataType::F64);

    let err = net
        .register_buffer("buffer_name", Param::new([2, 2], DataType::F32))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
    assert!(err.to_string().contains("buffer should be a tensor"));

    let err = net.register_buffer("buffer.name", var.clone()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Key);
    assert!(err.to_string().contains("name of buffer can not contain"));

    let err = net.register_buffer("", var.clone()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Key);
    assert!(err.to_string().contains("name of buffer can not be empty"));

    net.set_attr("attr_name", 10i32)?;
    let err = net.register_buffer("attr_name", var.clone()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Key);
    assert!(err.to_string().contains("already exists"));

    net.delete("attr_name")?;
    net.assign("attr_name", Param::new([2, 2], DataType::F32))?;
    let err = net.register_buffer("attr_name", var).unwrap_err();
    assert!(err.to_string().contains("already exists"));
    Ok(())
}

#[test]
fn test_register_buffer_same_name() -> Result<(), Box<dyn Error>> {
    let mut net = Layer::default();
    let var1 = Tensor::zeros([1], DataType::F64);
    let var2 = Tensor::create([2], vec![1.0f64, 2.0])?;

    net.register_buffer("buffer_name", var1.clone())?;
    assert_eq!(net.buffer("buffer_name"), Some(&var1));
    let err = net.register_buffer("buffer_name", var2.clone()).unwrap_err();
    assert!(err.to_string().contains("already exists"));
    assert_eq!(net.buffer("buffer_name"), Some(&var1));
    assert_eq!(net.state_dict().len(), 1);

    // plain assignment still replaces the tensor
    net.assign("buffer_name", var2.clone())?;
    assert_eq!(net.buffer("buffer_name"), Some(&var2));
    assert_eq!(net.buffers(true).len(), 1);
    assert_eq!(net.state_dict().len(), 1);

    // assigning a parameter removes the buffer
    net.assign("buffer_name", Param::new([2, 2], DataType::F32))?;
    assert_eq!(net.buffers(true).len(), 0);
    assert_eq!(net.state_dict().len(), 1);
    Ok(())
}

#[test]
fn test_buffer_not_persistable() -> Result<(), Box<dyn Error>> {
    let mut net = Layer::default();
    net.register_buffer_with("buffer_name", Tensor::zeros([1], DataType::F64), false)?;
    assert_eq!(net.buffers(true).len(), 1);
    assert_eq!(net.state_dict().len(), 0);

    net.delete("buffer_name")?;
    assert_eq!(net.buffers(true).len(), 0);
    Ok(())
}

#[test]
fn test_buffer_not_persistable_overwrite() -> Result<(), Box<dyn Error>> {
    let mut net = Layer::default();
    let var1 = Tensor::zeros([1], DataType::F64);
    let var2 = Tensor::zeros([2], DataType::F64);
    net.register_buffer_with("buffer_name", var1.clone(), false)?;
    net.register_buffer("buffer_name", var2)?;
    assert_eq!(net.buffers(true).len(), 1);
    assert_eq!(net.state_dict().len(), 1);

    // a persistable buffer can not be downgraded by registration
    let err = net.register_buffer_with("buffer_name", var1, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Key);
    assert_eq!(net.buffers(true).len(), 1);
    assert_eq!(net.state_dict().len(), 1);
    Ok(())
}

#[test]
fn test_buffer_not_persistable_assign() -> Result<(), Box<dyn Error>> {
    let mut net = Layer::default();
    let var1 = Tensor::zeros([1], DataType::F64);
    net.register_buffer_with("buffer_name", var1.clone(), false)?;

    // assigning none vacates the buffer, assigning a tensor refills it
    net.assign("buffer_name", Value::None)?;
    assert_eq!(net.buffers(true).len(), 0);
    assert_eq!(net.state_dict().len(), 0);

    net.assign("buffer_name", var1)?;
    assert_eq!(net.buffers(true).len(), 1);
    assert_eq!(net.state_dict().len(), 0);

    net.assign("buffer_name", Param::new([2, 2], DataType::F32))?;
    assert_eq!(net.buffers(true).len(), 0);
    assert_eq!(net.state_dict().len(), 1);
    Ok(())
}

#[test]
fn test_buffer_not_persistable_load() -> Result<(), Box<dyn Error>> {
    let mut net = Layer::default();
    net.register_buffer_with("buffer_name", Tensor::create([2], vec![1.5f64, -4.0])?, false)?;
    net.register_buffer("kept", Tensor::create([1], vec![7i32])?)?;
    let snapshot = net.state_dict().detached()?;

    let report = net.load_dict(&StateDict::new())?;
    assert!(!report.is_complete());
    assert_eq!(report.missing, ["kept"]);
    assert_eq!(net.state_dict(), snapshot);
    let buffer = net.buffer("buffer_name").ok_or("buffer_name")?;
    assert_eq!(&buffer.read::<f64>()?[..], &[1.5, -4.0]);
    Ok(())
}

#[test]
fn test_buffer_state_dict() -> Result<(), Box<dyn Error>> {
    let mut net = Layer::default();
    let var1 = Tensor::zeros([2, 3], DataType::F64);
    let var2 = Tensor::zeros([3, 2], DataType::F64);
    net.register_buffer("buffer_var1", var1.clone())?;
    net.register_buffer_with("buffer_var2", var2, false)?;

    let dict = net.state_dict();
    assert_eq!(dict.keys().collect_vec(), ["buffer_var1"]);

    let mut net_load = Layer::default();
    let var = Tensor::create([2, 3], vec![1.0f64; 6])?;
    net_load.register_buffer("buffer_var1", var.clone())?;
    net_load.load_dict(&dict)?;
    assert_eq!(net_load.buffer("buffer_var1"), Some(&var1));

    // loading writes in place
    assert!(net_load.buffer("buffer_var1").is_some_and(|x| x.shares_storage(&var)));
    Ok(())
}

#[test]
fn test_state_dict_file_round_trip() -> Result<(), Box<dyn Error>> {
    let source = l3()?;
    let path = std::env::temp_dir().join(format!("{}.safetensors", uuid::Uuid::new_v4()));
    source.layer().state_dict().save(&path)?;

    let mut target = l3()?;
    for param in target.layer().parameters(true) {
        param.write(&[0.0f32; 4])?;
    }
    assert!(all_close(&target.call(&[])?[0], 0.0));

    let dict = StateDict::load(&path)?;
    std::fs::remove_file(&path)?;
    let report = target.layer_mut().load_dict(&dict)?;
    assert_eq!(report.loaded.len(), 8);
    assert!(all_close(&target.call(&[])?[0], 0.8));
    Ok(())
}
