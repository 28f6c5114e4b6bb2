use kube::CustomResourceExt;

use spring_boot_operator::crd::SpringBootApplication;

fn main() {
    let crd = serde_yaml::to_string(&SpringBootApplication::crd()).unwrap();
    println!("{crd}");
}
