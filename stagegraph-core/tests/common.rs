use stagegraph_core::tensor::Tensor;

#[allow(dead_code)]
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[allow(dead_code)]
pub fn create_test_tensor(data: Vec<f64>, shape: Vec<usize>) -> Tensor {
    Tensor::new(data, shape).expect("Test tensor creation failed")
}

/// Inner product of two equally shaped tensors.
#[allow(dead_code)]
pub fn dot(a: &Tensor, b: &Tensor) -> f64 {
    assert_eq!(a.shape(), b.shape(), "dot of differently shaped tensors");
    a.data().iter().zip(b.data()).map(|(x, y)| x * y).sum()
}
